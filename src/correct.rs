//! Correction passes: deterministic application of the consensus record,
//! an optional LLM repair pass for fields the agents rejected, and a final
//! fill-the-gaps enrichment. Consensus values always win over model output.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::consensus::MatchingFields;
use crate::llm::Llm;
use crate::record::{Candidate, Consensus, Draft, Field, SourceId};
use crate::text::{coerce_year, normalize_month, normalize_pages, normalize_text, page_range};

/// Fields rewritten from consensus even when the draft already "matches":
/// their canonical display form matters (DOI casing, en-dash page ranges,
/// numeric months, exact title casing, full author names).
const ALWAYS_REWRITE: &[Field] = &[
    Field::Title,
    Field::Year,
    Field::Month,
    Field::Doi,
    Field::Pages,
];

/// Identity fields, locked against the model whenever consensus voted a
/// value for them.
const LOCK_ALWAYS: &[&str] = &["doi", "year", "month", "title", "authors"];
/// Structural fields, locked under the same rule: a non-empty consensus
/// value means the model patch for that field is discarded.
const LOCK_IF_PRESENT: &[&str] = &[
    "journal_name",
    "journal_abbrev",
    "conference_name",
    "volume",
    "issue",
    "pages",
];

/// One applied correction, kept for the provenance report.
#[derive(Clone, Debug, Serialize)]
pub struct Change {
    pub field: String,
    pub old: String,
    pub new: String,
    /// Source id, "consensus", "doi-agreement", "verify" or "llm".
    pub origin: String,
}

fn record_set(draft: &mut Draft, f: Field, value: &str, origin: &str, changes: &mut Vec<Change>) {
    let value = normalize_text(value);
    let old = draft.get(f).to_string();
    if value.is_empty() || old == value {
        return;
    }
    draft.set(f, &value);
    changes.push(Change {
        field: f.name().to_string(),
        old,
        new: value,
        origin: origin.to_string(),
    });
}

fn set_authors(draft: &mut Draft, authors: &[String], origin: &str, changes: &mut Vec<Change>) {
    let cleaned: Vec<String> = authors
        .iter()
        .map(|a| normalize_text(a))
        .filter(|a| !a.is_empty())
        .collect();
    if cleaned.is_empty() || cleaned == draft.authors {
        return;
    }
    changes.push(Change {
        field: "authors".to_string(),
        old: draft.authors.join("; "),
        new: cleaned.join("; "),
        origin: origin.to_string(),
    });
    draft.authors = cleaned;
}

/// Apply the round's consensus and agent suggestions to the draft.
/// Consensus values land first with their voted provenance; suggestions
/// then overwrite every field the consensus step did not already settle as
/// matching.
pub fn apply_corrections(
    draft: &mut Draft,
    best: &Consensus,
    matching: &MatchingFields,
    suggestions: &BTreeMap<&'static str, String>,
) -> Vec<Change> {
    let mut changes = Vec::new();
    if best.is_empty() {
        apply_suggestions(draft, matching, suggestions, &mut changes);
        renormalize(draft, &mut changes);
        return changes;
    }

    let origin_of = |name: &str| -> String {
        best.provenance
            .get(name)
            .cloned()
            .unwrap_or_else(|| "consensus".to_string())
    };

    for &f in Field::VOTABLE {
        let value = best.get(f);
        if value.is_empty() {
            continue;
        }
        // Matching fields keep the author's wording unless the canonical
        // form matters.
        if matching.contains(f.name()) && !ALWAYS_REWRITE.contains(&f) {
            continue;
        }
        record_set(draft, f, value, &origin_of(f.name()), &mut changes);
    }
    if !best.authors.is_empty() {
        set_authors(draft, &best.authors, &origin_of("authors"), &mut changes);
    }

    apply_suggestions(draft, matching, suggestions, &mut changes);
    renormalize(draft, &mut changes);
    debug!(changes = changes.len(), "corrections applied");
    changes
}

fn apply_suggestions(
    draft: &mut Draft,
    matching: &MatchingFields,
    suggestions: &BTreeMap<&'static str, String>,
    changes: &mut Vec<Change>,
) {
    for (&key, value) in suggestions {
        if key == "authors" {
            let list: Vec<String> = value
                .split(';')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            set_authors(draft, &list, "verify", changes);
            continue;
        }
        // Matching fields are settled; everything else the agents flagged
        // is overwritten, wrong values included.
        if matching.contains(key) {
            continue;
        }
        if let Some(f) = Field::ALL.iter().copied().find(|f| f.name() == key) {
            record_set(draft, f, value, "verify", changes);
        }
    }
}

/// Page enrichment driven by the draft: a lone page number is upgraded to
/// the longest true range in the whole candidate pool that starts at that
/// page, whichever source holds it.
pub fn enrich_pages(draft: &mut Draft, candidates: &[Candidate], changes: &mut Vec<Change>) {
    let (current, single) = normalize_pages(draft.get(Field::Pages));
    if !single {
        return;
    }
    let Ok(start) = current.parse::<u64>() else {
        return;
    };
    let mut chosen: Option<(u64, String, SourceId)> = None;
    for c in candidates {
        if let Some((s, e)) = page_range(&c.pages)
            && s == start
        {
            let len = e - s;
            if chosen.as_ref().is_none_or(|(best_len, _, _)| len > *best_len) {
                chosen = Some((len, normalize_pages(&c.pages).0, c.source));
            }
        }
    }
    if let Some((_, pages, source)) = chosen {
        record_set(draft, Field::Pages, &pages, source.as_str(), changes);
    }
}

/// Canonical display forms after any write: numeric month, hyphenated page
/// range, four-digit year.
fn renormalize(draft: &mut Draft, changes: &mut Vec<Change>) {
    if let Some(m) = draft.month.clone() {
        record_set(draft, Field::Month, &normalize_month(&m), "normalize", changes);
    }
    if let Some(p) = draft.pages.clone() {
        record_set(draft, Field::Pages, &normalize_pages(&p).0, "normalize", changes);
    }
    if let Some(y) = draft.year.clone() {
        let fixed = coerce_year(&y);
        if !fixed.is_empty() {
            record_set(draft, Field::Year, &fixed, "normalize", changes);
        }
    }
}

/// Ask the model to repair the fields the agents rejected. The patch is
/// sanitised hard: identity and already-present structural fields are
/// locked, and consensus is re-applied afterwards so the model can never
/// undo a voted value.
pub fn llm_correct(
    llm: &dyn Llm,
    draft: &mut Draft,
    best: &Consensus,
    verification: &BTreeMap<&'static str, bool>,
    changes: &mut Vec<Change>,
) {
    let failed: Vec<&str> = verification
        .iter()
        .filter(|(_, ok)| !**ok)
        .map(|(k, _)| *k)
        .collect();
    if failed.is_empty() {
        return;
    }

    let prompt = format!(
        "You are repairing a bibliographic record. Current record JSON:\n{}\n\
         Authoritative metadata JSON (trust this over the record):\n{}\n\
         Fields that failed verification: {}.\n\
         Return STRICT JSON with ONLY the fields you can fix, using the same keys. \
         Never invent identifiers. JSON ONLY.",
        draft.to_value(),
        best.to_value(),
        failed.join(", ")
    );
    let patch = llm.json(&prompt);
    let Some(obj) = patch.as_object() else {
        return;
    };

    for (key, value) in obj {
        let key = key.as_str();
        // The author list is repaired only through the agent suggestions.
        if key == "authors" {
            continue;
        }
        let Some(f) = Field::ALL.iter().copied().find(|f| f.name() == key) else {
            continue;
        };
        // Locked means consensus already voted the field: the model may
        // only fill genuine gaps.
        if (LOCK_ALWAYS.contains(&key) || LOCK_IF_PRESENT.contains(&key))
            && !best.get(f).is_empty()
        {
            continue;
        }
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        let text = if f == Field::Year {
            let y = coerce_year(&text);
            if y.is_empty() {
                continue;
            }
            y
        } else {
            text
        };
        record_set(draft, f, &text, "llm", changes);
    }

    // Consensus outranks the model: force voted values back on.
    for &f in Field::VOTABLE {
        let value = best.get(f);
        if !value.is_empty() {
            record_set(draft, f, value, "consensus", changes);
        }
    }
    renormalize(draft, changes);
}

/// Final enrichment: fill any still-empty draft field from the consensus.
/// Never overwrites.
pub fn enrich_from_best(draft: &mut Draft, best: &Consensus, changes: &mut Vec<Change>) {
    for &f in Field::VOTABLE {
        let value = best.get(f);
        if !value.is_empty() && draft.get(f).is_empty() {
            let origin = best
                .provenance
                .get(f.name())
                .cloned()
                .unwrap_or_else(|| "consensus".to_string());
            record_set(draft, f, value, &origin, changes);
        }
    }
    if draft.authors.is_empty() && !best.authors.is_empty() {
        let origin = best
            .provenance
            .get("authors")
            .cloned()
            .unwrap_or_else(|| "consensus".to_string());
        set_authors(draft, &best.authors, &origin, changes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DisabledLlm;

    fn best() -> Consensus {
        let mut b = Consensus::default();
        b.set(
            Field::Title,
            "Deep Residual Learning for Image Recognition".into(),
            "consensus".into(),
        );
        b.authors = vec!["Kaiming He".into(), "Xiangyu Zhang".into()];
        b.provenance.insert("authors", "consensus".into());
        b.set(Field::Year, "2016".into(), "crossref".into());
        b.set(Field::Doi, "10.1109/cvpr.2016.90".into(), "doi-agreement".into());
        b.set(Field::Pages, "770-778".into(), "crossref".into());
        b.set(Field::Volume, "1".into(), "crossref".into());
        b
    }

    #[test]
    fn consensus_overwrites_wrong_fields_and_logs() {
        let mut d = Draft::default();
        d.set(Field::Title, "Deep residual learning");
        d.set(Field::Year, "2015");
        let changes = apply_corrections(&mut d, &best(), &MatchingFields::new(), &BTreeMap::new());
        assert_eq!(d.year.as_deref(), Some("2016"));
        assert_eq!(d.doi.as_deref(), Some("10.1109/cvpr.2016.90"));
        assert_eq!(d.authors, vec!["Kaiming He", "Xiangyu Zhang"]);
        let year_change = changes.iter().find(|c| c.field == "year").unwrap();
        assert_eq!(year_change.old, "2015");
        assert_eq!(year_change.new, "2016");
        assert_eq!(year_change.origin, "crossref");
        let doi_change = changes.iter().find(|c| c.field == "doi").unwrap();
        assert_eq!(doi_change.origin, "doi-agreement");
    }

    #[test]
    fn matching_non_canonical_field_is_left_alone() {
        let mut d = Draft::default();
        d.set(Field::Volume, "1");
        let mut matching = MatchingFields::new();
        matching.insert("volume");
        let mut b = best();
        b.set(Field::Volume, "vol 1".into(), "crossref".into());
        apply_corrections(&mut d, &b, &matching, &BTreeMap::new());
        assert_eq!(d.volume.as_deref(), Some("1"));
    }

    #[test]
    fn matching_canonical_field_is_still_rewritten() {
        let mut d = Draft::default();
        d.set(Field::Doi, "10.1109/CVPR.2016.90");
        let mut matching = MatchingFields::new();
        matching.insert("doi");
        apply_corrections(&mut d, &best(), &matching, &BTreeMap::new());
        assert_eq!(d.doi.as_deref(), Some("10.1109/cvpr.2016.90"));
    }

    #[test]
    fn suggestions_overwrite_non_matching_fields() {
        let mut d = Draft::default();
        d.set(Field::JournalAbbrev, "Wrong Abbrev");
        let mut sugg = BTreeMap::new();
        sugg.insert(
            "journal_abbrev",
            "IEEE Trans. Pattern Anal. Mach. Intell.".to_string(),
        );
        let changes =
            apply_corrections(&mut d, &Consensus::default(), &MatchingFields::new(), &sugg);
        assert_eq!(
            d.journal_abbrev.as_deref(),
            Some("IEEE Trans. Pattern Anal. Mach. Intell.")
        );
        assert!(changes.iter().any(|c| c.field == "journal_abbrev" && c.origin == "verify"));
    }

    #[test]
    fn matching_fields_are_immune_to_suggestions() {
        let mut d = Draft::default();
        d.set(Field::JournalName, "Nature");
        let mut matching = MatchingFields::new();
        matching.insert("journal_name");
        let mut sugg = BTreeMap::new();
        sugg.insert("journal_name", "Science".to_string());
        apply_corrections(&mut d, &Consensus::default(), &matching, &sugg);
        assert_eq!(d.journal_name.as_deref(), Some("Nature"));
    }

    #[test]
    fn no_consensus_still_renormalizes() {
        let mut d = Draft::default();
        d.set(Field::Month, "Aug");
        d.set(Field::Pages, "12\u{2013}34");
        let changes =
            apply_corrections(&mut d, &Consensus::default(), &MatchingFields::new(), &BTreeMap::new());
        assert_eq!(d.month.as_deref(), Some("8"));
        assert_eq!(d.pages.as_deref(), Some("12-34"));
        assert!(changes.iter().all(|c| c.origin == "normalize"));
    }

    #[test]
    fn llm_pass_is_a_noop_when_disabled() {
        let mut d = Draft::default();
        d.set(Field::Year, "2016");
        let mut verification = BTreeMap::new();
        verification.insert("volume", false);
        let mut changes = Vec::new();
        llm_correct(&DisabledLlm, &mut d, &best(), &verification, &mut changes);
        // Consensus re-application still runs.
        assert_eq!(d.doi.as_deref(), Some("10.1109/cvpr.2016.90"));
    }

    /// Model stub returning one fixed patch.
    struct PatchLlm(Value);

    impl Llm for PatchLlm {
        fn json(&self, _prompt: &str) -> Value {
            self.0.clone()
        }

        fn text(&self, _prompt: &str) -> String {
            String::new()
        }
    }

    #[test]
    fn model_fills_fields_consensus_knows_nothing_about() {
        let mut d = Draft::default();
        d.set(Field::Title, "Some Work");
        let llm = PatchLlm(serde_json::json!({
            "doi": "10.1234/filled.by.model",
            "volume": "7",
        }));
        let mut verification = BTreeMap::new();
        verification.insert("doi", false);
        let mut changes = Vec::new();
        llm_correct(&llm, &mut d, &Consensus::default(), &verification, &mut changes);
        assert_eq!(d.doi.as_deref(), Some("10.1234/filled.by.model"));
        assert_eq!(d.volume.as_deref(), Some("7"));
        assert!(changes.iter().any(|c| c.field == "doi" && c.origin == "llm"));
    }

    #[test]
    fn consensus_locked_fields_ignore_the_model() {
        let mut d = Draft::default();
        let llm = PatchLlm(serde_json::json!({
            "doi": "10.9999/fabricated",
            "year": "1901",
            "pages": "1-2",
        }));
        let mut verification = BTreeMap::new();
        verification.insert("doi", false);
        verification.insert("year", false);
        let mut changes = Vec::new();
        llm_correct(&llm, &mut d, &best(), &verification, &mut changes);
        assert_eq!(d.doi.as_deref(), Some("10.1109/cvpr.2016.90"));
        assert_eq!(d.year.as_deref(), Some("2016"));
        assert_eq!(d.pages.as_deref(), Some("770-778"));
        assert!(changes.iter().all(|c| c.origin != "llm"));
    }

    #[test]
    fn draft_single_page_is_upgraded_from_any_candidate() {
        let mut d = Draft::default();
        d.set(Field::Pages, "5338");
        let mut c = Candidate::new(SourceId::Pubmed);
        c.pages = "5338\u{2013}5346".into();
        let mut short = Candidate::new(SourceId::Arxiv);
        short.pages = "5338-5340".into();
        let mut changes = Vec::new();
        enrich_pages(&mut d, &[short, c], &mut changes);
        assert_eq!(d.pages.as_deref(), Some("5338-5346"));
        assert_eq!(changes[0].origin, "pubmed");
    }

    #[test]
    fn full_range_draft_pages_are_left_alone() {
        let mut d = Draft::default();
        d.set(Field::Pages, "10-20");
        let mut c = Candidate::new(SourceId::Crossref);
        c.pages = "10-99".into();
        let mut changes = Vec::new();
        enrich_pages(&mut d, &[c], &mut changes);
        assert_eq!(d.pages.as_deref(), Some("10-20"));
        assert!(changes.is_empty());
    }

    #[test]
    fn enrich_fills_without_overwriting() {
        let mut d = Draft::default();
        d.set(Field::Year, "1999");
        let mut changes = Vec::new();
        enrich_from_best(&mut d, &best(), &mut changes);
        assert_eq!(d.year.as_deref(), Some("1999"));
        assert_eq!(d.volume.as_deref(), Some("1"));
        assert_eq!(d.authors, vec!["Kaiming He", "Xiangyu Zhang"]);
    }
}
