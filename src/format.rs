//! Final rendering of the corrected record as an IEEE-style reference
//! string. The model gets the first attempt with a strict style hint; its
//! output is gated and the deterministic templates take over whenever the
//! gate rejects it.

use tracing::debug;

use crate::llm::Llm;
use crate::record::{Draft, Field, RefType};
use crate::text::{
    format_authors_ieee_list, format_doi_link, month_display, normalize_pages, normalize_text,
};

const IEEE_HINT: &str = "IEEE reference style: authors as initials then surname, \
title in double quotes ending with a comma inside the quotes, venue in *italics*, \
then vol., no., pp. with an en dash, month abbreviation and year, and the DOI as \
a https://doi.org/ link. Single line, no numbering, no surrounding brackets.";

/// Render the reference. Model output is used only when it looks like a
/// plausible one-line reference; everything else falls back to templates.
pub fn render(llm: &dyn Llm, draft: &Draft, ref_type: RefType) -> String {
    let prompt = format!(
        "{IEEE_HINT}\nReference type: {}.\nRecord JSON:\n{}\nReturn the formatted reference line only.",
        ref_type.label(),
        draft.to_value()
    );
    let candidate = sanitize(&llm.text(&prompt));
    if is_reasonable(&candidate) {
        return candidate;
    }
    debug!("model formatting rejected, using deterministic template");
    deterministic(draft, ref_type)
}

/// One line, no list numbering, no stray brackets around the whole entry.
fn sanitize(s: &str) -> String {
    let s = normalize_text(&s.replace('\n', " "));
    let s = s.trim_start_matches(|c: char| {
        c == '[' || c == ']' || c == '.' || c.is_ascii_digit() || c.is_whitespace()
    });
    s.trim().to_string()
}

/// Cheap plausibility gate for model output: long enough to be a reference
/// and carrying at least one structural marker.
fn is_reasonable(s: &str) -> bool {
    s.len() >= 20
        && (s.contains('"') || s.contains('*') || s.contains("doi.org") || s.contains("http"))
}

/// Template renderer. Every branch ends with a period; empty fields simply
/// drop their segment.
pub fn deterministic(draft: &Draft, ref_type: RefType) -> String {
    let mut parts: Vec<String> = Vec::new();

    let authors = format_authors_ieee_list(&draft.authors);
    if !authors.is_empty() {
        parts.push(authors);
    }

    let title = draft.get(Field::Title);
    if !title.is_empty() {
        match ref_type {
            RefType::Book | RefType::BookChapter => parts.push(format!("*{title}*")),
            _ => parts.push(format!("\u{201c}{title},\u{201d}").replace(",,", ",")),
        }
    }

    if let Some(venue) = venue_segment(draft, ref_type) {
        parts.push(venue);
    }

    let volume = draft.get(Field::Volume);
    if !volume.is_empty() {
        parts.push(format!("vol. {volume}"));
    }
    let issue = draft.get(Field::Issue);
    if !issue.is_empty() {
        parts.push(format!("no. {issue}"));
    }
    if let Some(p) = pages_segment(draft.get(Field::Pages)) {
        parts.push(p);
    }

    if let Some(date) = date_segment(draft) {
        parts.push(date);
    }

    let doi = draft.get(Field::Doi);
    if !doi.is_empty() {
        parts.push(format!("doi: {}", format_doi_link(doi)));
    } else if !draft.get(Field::Url).is_empty() {
        parts.push(format!("[Online]. Available: {}", draft.get(Field::Url)));
    }

    let mut out = parts.join(", ");
    if !out.ends_with('.') {
        out.push('.');
    }
    out
}

fn venue_segment(draft: &Draft, ref_type: RefType) -> Option<String> {
    let journal = {
        let abbrev = draft.get(Field::JournalAbbrev);
        if abbrev.is_empty() {
            draft.get(Field::JournalName)
        } else {
            abbrev
        }
    };
    match ref_type {
        RefType::ConferencePaper => {
            let conf = {
                let c = draft.get(Field::ConferenceName);
                if c.is_empty() { journal } else { c }
            };
            (!conf.is_empty()).then(|| format!("in *{conf}*"))
        }
        RefType::Preprint => {
            let arxiv = draft.get(Field::ArxivId);
            if !arxiv.is_empty() {
                Some(format!("arXiv:{arxiv}"))
            } else if !journal.is_empty() && journal != "arXiv" {
                Some(format!("*{journal}*"))
            } else {
                Some("arXiv preprint".to_string())
            }
        }
        RefType::Book | RefType::BookChapter => {
            let publisher = draft.get(Field::Publisher);
            let location = draft.get(Field::Location);
            match (location.is_empty(), publisher.is_empty()) {
                (false, false) => Some(format!("{location}: {publisher}")),
                (true, false) => Some(publisher.to_string()),
                _ => None,
            }
        }
        RefType::Thesis => Some(format!(
            "Ph.D. dissertation, {}",
            non_empty_or(draft.get(Field::Publisher), "unpublished")
        )),
        RefType::TechnicalReport => {
            let p = draft.get(Field::Publisher);
            (!p.is_empty()).then(|| format!("Tech. Rep., {p}"))
        }
        _ => (!journal.is_empty()).then(|| format!("*{journal}*")),
    }
}

fn non_empty_or<'a>(v: &'a str, fallback: &'a str) -> &'a str {
    if v.is_empty() { fallback } else { v }
}

/// "pp. a–b" for true ranges, "Art. no. X" for electronic locators.
fn pages_segment(pages: &str) -> Option<String> {
    let (p, is_eloc) = normalize_pages(pages);
    if p.is_empty() {
        return None;
    }
    if is_eloc {
        return Some(format!("Art. no. {p}"));
    }
    Some(format!("pp. {}", p.replace('-', "\u{2013}")))
}

fn date_segment(draft: &Draft) -> Option<String> {
    let year = draft.get(Field::Year);
    if year.is_empty() {
        return None;
    }
    let month = month_display(draft.get(Field::Month));
    if month.is_empty() {
        Some(year.to_string())
    } else {
        Some(format!("{month} {year}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DisabledLlm;

    fn resnet() -> Draft {
        let mut d = Draft::default();
        d.set(Field::Title, "Deep Residual Learning for Image Recognition");
        d.authors = vec![
            "Kaiming He".into(),
            "Xiangyu Zhang".into(),
            "Shaoqing Ren".into(),
            "Jian Sun".into(),
        ];
        d.set(Field::ConferenceName, "Proc. IEEE Conf. Comput. Vis. Pattern Recognit. (CVPR)");
        d.set(Field::Year, "2016");
        d.set(Field::Month, "6");
        d.set(Field::Pages, "770-778");
        d.set(Field::Doi, "10.1109/CVPR.2016.90");
        d
    }

    #[test]
    fn conference_paper_template() {
        let s = render(&DisabledLlm, &resnet(), RefType::ConferencePaper);
        assert!(s.starts_with("K. He, X. Zhang, S. Ren, and J. Sun"));
        assert!(s.contains("\u{201c}Deep Residual Learning for Image Recognition,\u{201d}"));
        assert!(s.contains("in *Proc. IEEE Conf. Comput. Vis. Pattern Recognit. (CVPR)*"));
        assert!(s.contains("pp. 770\u{2013}778"));
        assert!(s.contains("Jun 2016"));
        assert!(s.contains("doi: https://doi.org/10.1109/cvpr.2016.90"));
        assert!(s.ends_with('.'));
    }

    #[test]
    fn journal_article_uses_abbrev_and_volume() {
        let mut d = resnet();
        d.set(Field::ConferenceName, "");
        d.set(Field::JournalName, "IEEE Transactions on Pattern Analysis and Machine Intelligence");
        d.set(Field::JournalAbbrev, "IEEE Trans. Pattern Anal. Mach. Intell.");
        d.set(Field::Volume, "39");
        d.set(Field::Issue, "6");
        let s = render(&DisabledLlm, &d, RefType::JournalArticle);
        assert!(s.contains("*IEEE Trans. Pattern Anal. Mach. Intell.*"));
        assert!(s.contains("vol. 39, no. 6"));
    }

    #[test]
    fn electronic_locator_renders_as_art_no() {
        let mut d = resnet();
        d.set(Field::Pages, "e0261234");
        let s = deterministic(&d, RefType::JournalArticle);
        assert!(s.contains("Art. no. e0261234"));
        assert!(!s.contains("pp."));
    }

    #[test]
    fn preprint_uses_arxiv_id() {
        let mut d = resnet();
        d.set(Field::ConferenceName, "");
        d.set(Field::Doi, "");
        d.set(Field::ArxivId, "1512.03385");
        let s = deterministic(&d, RefType::Preprint);
        assert!(s.contains("arXiv:1512.03385"));
        assert!(!s.contains("doi.org"));
    }

    #[test]
    fn sanitizer_strips_list_numbering() {
        assert_eq!(sanitize("[1] A. B, \"T,\" 2020."), "A. B, \"T,\" 2020.");
        assert_eq!(sanitize("1. A. B, \"T,\" 2020."), "A. B, \"T,\" 2020.");
    }

    #[test]
    fn short_model_output_is_rejected() {
        assert!(!is_reasonable("ok"));
        assert!(!is_reasonable("a plain sentence without any reference markers whatsoever"));
        assert!(is_reasonable("A. B, \"Some Title,\" *Venue*, 2020."));
    }
}
