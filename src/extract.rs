//! Field extraction: raw reference text to a structured [`Draft`].
//! LLM-first with a strict-JSON prompt; a regex battery takes over when the
//! model returns nothing usable.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::llm::Llm;
use crate::record::{Draft, Field};
use crate::text::{authors_to_list, normalize_month};

static DOI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(10\.\d{4,9}/[^\s,;]+)").unwrap());
static ARXIV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:arxiv:)?\s*(\d{4}\.\d{4,5})(v\d+)?").unwrap());
static QUOTED_TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("\u{201c}([^\u{201d}]{3,})\u{201d}|\"([^\"]{3,})\"").unwrap());
static PAGES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)pp\.?\s*([\d–—\-]+)").unwrap());
static VOLUME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)vol\.?\s*([0-9A-Za-z]+)").unwrap());
static ISSUE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)no\.?\s*([0-9A-Za-z]+)").unwrap());
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap());

/// Extract a draft from raw reference text. `type_hint` is the detected
/// reference type label, passed to the model as context only.
pub fn extract(llm: &dyn Llm, reference: &str, type_hint: &str) -> Draft {
    let prompt = format!(
        "Parse the IEEE-style reference. Return STRICT JSON. Keys among:\n\
         title, authors (list or string), journal_name, journal_abbrev, conference_name,\n\
         volume, issue, pages, year, month, doi, publisher, location, edition, isbn, url, arxiv_id.\n\
         Omit unknown or invalid keys.\n\
         IMPORTANT: If any extracted field contains extra characters, unexpected full stops, \
         or other formatting issues that make it unlikely to be correct, DO NOT extract it. JSON ONLY.\n\n\
         Type hint: {type_hint}\nReference: {reference}"
    );
    let parsed = llm.json(&prompt);
    let mut draft = Draft::from_json(&parsed);

    if draft == Draft::default() {
        debug!("model extraction empty, falling back to regex extraction");
        draft = regex_extract(reference);
    }
    if let Some(m) = &draft.month {
        draft.month = Some(normalize_month(m));
    }
    draft
}

/// Deterministic fallback: quoted title, authors from the text preceding
/// it, then DOI / arXiv / pages / volume / issue / year patterns.
pub fn regex_extract(reference: &str) -> Draft {
    let mut d = Draft::default();

    if let Some(caps) = QUOTED_TITLE_RE.captures(reference) {
        // The comma IEEE places before the closing quote punctuates the
        // citation, not the title.
        let title = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().trim().trim_end_matches([',', '.']).trim_end().to_string())
            .unwrap_or_default();
        if !title.is_empty() {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            d.set(Field::Title, &title);
            d.authors = authors_to_list(&reference[..start]);
        }
    }
    if let Some(caps) = DOI_RE.captures(reference) {
        // Trailing prose punctuation is not part of the DOI.
        let doi = caps
            .get(1)
            .map(|m| m.as_str())
            .unwrap_or("")
            .trim_end_matches(['.', ',', ';', ':', ')', ']', '}', '"', '\'']);
        d.set(Field::Doi, doi);
    }
    if let Some(caps) = ARXIV_RE.captures(reference)
        && reference.to_lowercase().contains("arxiv")
    {
        d.set(Field::ArxivId, caps.get(1).map(|m| m.as_str()).unwrap_or(""));
    }
    if let Some(caps) = PAGES_RE.captures(reference) {
        let p = caps
            .get(1)
            .map(|m| m.as_str().replace(['\u{2013}', '\u{2014}'], "-"))
            .unwrap_or_default();
        d.set(Field::Pages, &p);
    }
    if let Some(caps) = VOLUME_RE.captures(reference) {
        d.set(Field::Volume, caps.get(1).map(|m| m.as_str()).unwrap_or(""));
    }
    if let Some(caps) = ISSUE_RE.captures(reference) {
        d.set(Field::Issue, caps.get(1).map(|m| m.as_str()).unwrap_or(""));
    }
    if let Some(m) = YEAR_RE.find(reference) {
        d.set(Field::Year, m.as_str());
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DisabledLlm;
    use proptest::prelude::*;

    const RESNET: &str = "K. He, X. Zhang, S. Ren, and J. Sun, \"Deep Residual Learning for Image Recognition,\" in Proc. CVPR, 2016, pp. 770-778, doi: 10.1109/CVPR.2016.90.";

    #[test]
    fn regex_fallback_extracts_core_fields() {
        let d = extract(&DisabledLlm, RESNET, "conference paper");
        assert_eq!(
            d.title.as_deref(),
            Some("Deep Residual Learning for Image Recognition")
        );
        assert_eq!(d.authors, vec!["K. He", "X. Zhang", "S. Ren", "J. Sun"]);
        assert_eq!(d.year.as_deref(), Some("2016"));
        assert_eq!(d.pages.as_deref(), Some("770-778"));
        assert_eq!(d.doi.as_deref(), Some("10.1109/CVPR.2016.90"));
    }

    #[test]
    fn curly_quotes_work_too() {
        let d = regex_extract("A. Author, \u{201c}Some Title Here,\u{201d} 2019.");
        assert_eq!(d.title.as_deref(), Some("Some Title Here"));
        assert_eq!(d.authors, vec!["A. Author"]);
    }

    #[test]
    fn arxiv_id_requires_arxiv_context() {
        let d = regex_extract("J. Devlin et al., \"BERT,\" arXiv:1810.04805, 2018.");
        assert_eq!(d.arxiv_id.as_deref(), Some("1810.04805"));
        // A bare number that merely looks like an arXiv id is not one.
        let d2 = regex_extract("Report 1810.04805 of the council, 1999.");
        assert_eq!(d2.arxiv_id, None);
    }

    #[test]
    fn en_dash_pages_are_normalised() {
        let d = regex_extract("X, \"T i t l e,\" pp. 5338\u{2013}5346, 2020.");
        assert_eq!(d.pages.as_deref(), Some("5338-5346"));
    }

    proptest::proptest! {
        #[test]
        fn doi_regex_finds_generated_dois(digits in "[0-9]{4,9}", suffix in "[a-zA-Z0-9./-]{1,24}") {
            let text = format!("see doi: 10.{digits}/{suffix} for details");
            let prefix = format!("10.{digits}/");
            let d = regex_extract(&text);
            proptest::prop_assert!(d.doi.is_some());
            let doi = d.doi.unwrap();
            proptest::prop_assert!(doi.starts_with(&prefix));
        }

        #[test]
        fn year_in_plausible_window(y in 1900u32..=2029) {
            let d = regex_extract(&format!("A. B, \"T,\" {y}."));
            proptest::prop_assert_eq!(d.year, Some(y.to_string()));
        }
    }
}
