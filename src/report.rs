//! Plain-text provenance report: what came in, what went out, which fields
//! verified and every correction with its origin.

use std::collections::BTreeMap;

use crate::correct::Change;
use crate::record::RefType;
use crate::verify::VERIFIED_KEYS;

pub fn render(
    reference: &str,
    ref_type: RefType,
    formatted: &str,
    verification: &BTreeMap<&'static str, bool>,
    corrections: &[Change],
    rounds: u32,
) -> String {
    let mut out = String::new();
    out.push_str("Reference verification report\n");
    out.push_str("=============================\n\n");
    out.push_str(&format!("Input:     {reference}\n"));
    out.push_str(&format!("Type:      {}\n", ref_type.label()));
    out.push_str(&format!("Rounds:    {rounds}\n"));
    out.push_str(&format!("Output:    {formatted}\n\n"));

    let passed = verification.values().filter(|v| **v).count();
    out.push_str(&format!(
        "Field verification ({passed}/{} passed)\n",
        verification.len()
    ));
    for &key in VERIFIED_KEYS {
        let mark = match verification.get(key) {
            Some(true) => "ok",
            Some(false) => "FAILED",
            None => "-",
        };
        out.push_str(&format!("  {key:<16} {mark}\n"));
    }

    out.push('\n');
    if corrections.is_empty() {
        out.push_str("No corrections were necessary.\n");
    } else {
        out.push_str(&format!("Corrections ({})\n", corrections.len()));
        for c in corrections {
            let old = if c.old.is_empty() { "(empty)" } else { c.old.as_str() };
            out.push_str(&format!(
                "  {:<16} {} -> {}  [{}]\n",
                c.field, old, c.new, c.origin
            ));
        }
    }
    out
}

/// Report for input that never entered the loop.
pub fn rejection(reference: &str, message: &str) -> String {
    let mut out = String::new();
    out.push_str("Reference verification report\n");
    out.push_str("=============================\n\n");
    out.push_str(&format!("Input:     {reference}\n"));
    out.push_str(&format!("Rejected:  {message}\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_carries_the_message() {
        let r = rejection("hello", "input does not look like a bibliographic reference");
        assert!(r.contains("Rejected:  input does not look like a bibliographic reference"));
        assert!(r.contains("Input:     hello"));
    }

    #[test]
    fn report_lists_failures_and_corrections() {
        let mut verification = BTreeMap::new();
        for &k in VERIFIED_KEYS {
            verification.insert(k, true);
        }
        verification.insert("year", false);
        let corrections = vec![Change {
            field: "doi".into(),
            old: String::new(),
            new: "10.1109/cvpr.2016.90".into(),
            origin: "doi-agreement".into(),
        }];
        let r = render(
            "some input",
            RefType::ConferencePaper,
            "formatted output",
            &verification,
            &corrections,
            2,
        );
        assert!(r.contains("Type:      conference paper"));
        assert!(r.contains("year             FAILED"));
        assert!(r.contains("(empty) -> 10.1109/cvpr.2016.90  [doi-agreement]"));
        assert!(r.contains("Rounds:    2"));
    }

    #[test]
    fn clean_run_reports_no_corrections() {
        let verification: BTreeMap<&'static str, bool> =
            VERIFIED_KEYS.iter().map(|&k| (k, true)).collect();
        let r = render("in", RefType::JournalArticle, "out", &verification, &[], 1);
        assert!(r.contains("No corrections were necessary."));
        assert!(r.contains(&format!("({}/{} passed)", VERIFIED_KEYS.len(), VERIFIED_KEYS.len())));
    }
}
