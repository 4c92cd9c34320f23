//! Machine-readable exports of the corrected record: one CSL-JSON item and
//! one BibTeX entry. Both are derived from the same draft the formatter
//! renders, so the three outputs can never disagree.

use serde_json::{Value, json};
use tracing::warn;

use crate::record::{Draft, Field, RefType};
use crate::text::{normalize_doi, normalize_pages};

/// Citation key: first author's surname, year, first significant title
/// word, all lowercased. "he2016deep" style.
pub fn citekey(draft: &Draft) -> String {
    const STOP: &[&str] = &["a", "an", "the", "on", "of", "and", "in", "for", "to"];
    let surname = draft
        .authors
        .first()
        .and_then(|a| crate::text::last_name(a))
        .unwrap_or_else(|| "anon".to_string());
    let year = draft.get(Field::Year);
    let word = draft
        .get(Field::Title)
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .find(|w| !w.is_empty() && !STOP.contains(&w.as_str()))
        .unwrap_or_default();
    let key: String = format!("{surname}{year}{word}")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if key.is_empty() { "ref".to_string() } else { key }
}

/// "Given Names Family" or "Family, Given Names" into (family, given).
fn split_author(name: &str) -> (String, String) {
    if let Some((family, given)) = name.split_once(',') {
        return (family.trim().to_string(), given.trim().to_string());
    }
    let mut parts: Vec<&str> = name.split_whitespace().collect();
    match parts.len() {
        0 => (String::new(), String::new()),
        1 => (parts[0].to_string(), String::new()),
        _ => {
            let family = parts.pop().unwrap_or_default().to_string();
            (family, parts.join(" "))
        }
    }
}

/// Build the CSL-JSON item for this record.
pub fn csl_json(draft: &Draft, ref_type: RefType) -> Value {
    let mut item = serde_json::Map::new();
    item.insert("id".into(), json!(citekey(draft)));
    item.insert("type".into(), json!(ref_type.csl_type()));

    let put = |item: &mut serde_json::Map<String, Value>, key: &str, value: &str| {
        if !value.is_empty() {
            item.insert(key.to_string(), json!(value));
        }
    };
    put(&mut item, "title", draft.get(Field::Title));

    if !draft.authors.is_empty() {
        let authors: Vec<Value> = draft
            .authors
            .iter()
            .map(|a| {
                let (family, given) = split_author(a);
                let mut m = serde_json::Map::new();
                if !family.is_empty() {
                    m.insert("family".into(), json!(family));
                }
                if !given.is_empty() {
                    m.insert("given".into(), json!(given));
                }
                Value::Object(m)
            })
            .collect();
        item.insert("author".into(), Value::Array(authors));
    }

    let container = match ref_type {
        RefType::ConferencePaper => {
            let c = draft.get(Field::ConferenceName);
            if c.is_empty() { draft.get(Field::JournalName) } else { c }
        }
        _ => draft.get(Field::JournalName),
    };
    put(&mut item, "container-title", container);
    put(&mut item, "volume", draft.get(Field::Volume));
    put(&mut item, "issue", draft.get(Field::Issue));
    put(&mut item, "page", &normalize_pages(draft.get(Field::Pages)).0);
    put(&mut item, "DOI", &normalize_doi(draft.get(Field::Doi)));
    put(&mut item, "publisher", draft.get(Field::Publisher));
    put(&mut item, "publisher-place", draft.get(Field::Location));
    put(&mut item, "URL", draft.get(Field::Url));
    put(&mut item, "ISBN", draft.get(Field::Isbn));

    let mut date_parts: Vec<i64> = Vec::new();
    if let Ok(y) = draft.get(Field::Year).parse::<i64>() {
        date_parts.push(y);
        if let Ok(m) = draft.get(Field::Month).parse::<i64>()
            && (1..=12).contains(&m)
        {
            date_parts.push(m);
        }
    }
    if !date_parts.is_empty() {
        item.insert("issued".into(), json!({ "date-parts": [date_parts] }));
    }
    Value::Object(item)
}

/// TeX-special characters that must be escaped inside field values.
fn bibtex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' | '%' | '$' | '#' | '_' => {
                out.push('\\');
                out.push(c);
            }
            '{' | '}' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Build the BibTeX entry. The result is parsed back once as a sanity
/// check; a parse failure is logged and the text returned regardless.
pub fn bibtex(draft: &Draft, ref_type: RefType) -> String {
    let mut fields: Vec<(&'static str, String)> = Vec::new();
    let mut push = |k: &'static str, v: &str| {
        if !v.is_empty() {
            fields.push((k, bibtex_escape(v)));
        }
    };

    // Outer braces protect the title's casing from BibTeX styles.
    push("title", draft.get(Field::Title));
    if !draft.authors.is_empty() {
        let joined = draft
            .authors
            .iter()
            .map(|a| {
                let (family, given) = split_author(a);
                if given.is_empty() { family } else { format!("{family}, {given}") }
            })
            .collect::<Vec<_>>()
            .join(" and ");
        push("author", &joined);
    }
    match ref_type {
        RefType::ConferencePaper => {
            let c = draft.get(Field::ConferenceName);
            push(
                "booktitle",
                if c.is_empty() { draft.get(Field::JournalName) } else { c },
            );
        }
        RefType::BookChapter => push("booktitle", draft.get(Field::JournalName)),
        _ => push("journal", draft.get(Field::JournalName)),
    }
    push("volume", draft.get(Field::Volume));
    push("number", draft.get(Field::Issue));
    push(
        "pages",
        &normalize_pages(draft.get(Field::Pages)).0.replace('-', "--"),
    );
    push("year", draft.get(Field::Year));
    let month = crate::text::month_display(draft.get(Field::Month));
    if !month.is_empty() {
        push("month", &month.to_lowercase());
    }
    push("doi", &normalize_doi(draft.get(Field::Doi)));
    push("publisher", draft.get(Field::Publisher));
    push("address", draft.get(Field::Location));
    push("edition", draft.get(Field::Edition));
    push("isbn", draft.get(Field::Isbn));
    push("url", draft.get(Field::Url));
    if !draft.get(Field::ArxivId).is_empty() {
        push("eprint", draft.get(Field::ArxivId));
        push("archiveprefix", "arXiv");
    }

    let mut entry = format!("@{}{{{},\n", ref_type.bibtex_type(), citekey(draft));
    for (k, v) in &fields {
        if *k == "title" {
            entry.push_str(&format!("  {k} = {{{{{v}}}}},\n"));
        } else {
            entry.push_str(&format!("  {k} = {{{v}}},\n"));
        }
    }
    entry.push_str("}\n");

    if biblatex::Bibliography::parse(&entry).is_err() {
        warn!("generated bibtex entry failed to re-parse");
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resnet() -> Draft {
        let mut d = Draft::default();
        d.set(Field::Title, "Deep Residual Learning for Image Recognition");
        d.authors = vec!["Kaiming He".into(), "Xiangyu Zhang".into()];
        d.set(Field::ConferenceName, "Proc. CVPR");
        d.set(Field::Year, "2016");
        d.set(Field::Month, "6");
        d.set(Field::Pages, "770\u{2013}778");
        d.set(Field::Doi, "10.1109/CVPR.2016.90");
        d
    }

    #[test]
    fn citekey_shape() {
        assert_eq!(citekey(&resnet()), "he2016deep");
        assert_eq!(citekey(&Draft::default()), "anon");
    }

    #[test]
    fn csl_item_for_conference_paper() {
        let v = csl_json(&resnet(), RefType::ConferencePaper);
        assert_eq!(v["type"], "paper-conference");
        assert_eq!(v["container-title"], "Proc. CVPR");
        assert_eq!(v["DOI"], "10.1109/cvpr.2016.90");
        assert_eq!(v["page"], "770-778");
        assert_eq!(v["issued"]["date-parts"][0][0], 2016);
        assert_eq!(v["issued"]["date-parts"][0][1], 6);
        assert_eq!(v["author"][0]["family"], "He");
        assert_eq!(v["author"][0]["given"], "Kaiming");
    }

    #[test]
    fn csl_omits_empty_fields() {
        let mut d = Draft::default();
        d.set(Field::Title, "T");
        let v = csl_json(&d, RefType::JournalArticle);
        assert!(v.get("volume").is_none());
        assert!(v.get("issued").is_none());
        assert!(v.get("author").is_none());
    }

    #[test]
    fn bibtex_round_trips_through_parser() {
        let entry = bibtex(&resnet(), RefType::ConferencePaper);
        assert!(entry.starts_with("@inproceedings{he2016deep,"));
        assert!(entry.contains("pages = {770--778}"));
        assert!(entry.contains("author = {He, Kaiming and Zhang, Xiangyu}"));
        let bib = biblatex::Bibliography::parse(&entry).unwrap();
        assert_eq!(bib.len(), 1);
    }

    #[test]
    fn bibtex_escapes_tex_specials() {
        let mut d = resnet();
        d.set(Field::Title, "Limits & Bounds of 100% Accuracy");
        let entry = bibtex(&d, RefType::JournalArticle);
        assert!(entry.contains(r"Limits \& Bounds of 100\% Accuracy"));
    }

    #[test]
    fn comma_form_author_is_respected() {
        assert_eq!(
            split_author("van der Berg, Anna"),
            ("van der Berg".to_string(), "Anna".to_string())
        );
        assert_eq!(split_author("Plato"), ("Plato".to_string(), String::new()));
    }
}
