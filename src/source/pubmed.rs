//! PubMed E-utilities (biomedical index). Two-step lookup: esearch for the
//! PMID, esummary for the record. No DOI endpoint.

use std::sync::Arc;

use serde_json::Value;

use crate::record::{Candidate, SourceId};
use crate::runtime::RuntimeResources;
use crate::source::{SourceClient, get_json};
use crate::text::normalize_text;

const ESEARCH: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const ESUMMARY: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esummary.fcgi";

pub struct PubMed {
    rt: Arc<RuntimeResources>,
}

impl PubMed {
    pub fn new(rt: Arc<RuntimeResources>) -> PubMed {
        PubMed { rt }
    }
}

impl SourceClient for PubMed {
    fn id(&self) -> SourceId {
        SourceId::Pubmed
    }

    fn by_title(&self, title: &str) -> Vec<Candidate> {
        let key = format!("title:{}", title.to_lowercase());
        if let Some(cached) = self.rt.cache.get(self.id(), &key) {
            return normalize(&cached).into_iter().collect();
        }
        let search = [
            ("db", "pubmed"),
            ("term", title),
            ("retmode", "json"),
            ("retmax", "1"),
            ("tool", "citefix"),
        ];
        let Ok(d) = get_json(&self.rt, ESEARCH, &search, &[]) else {
            return Vec::new();
        };
        let Some(pmid) = d["esearchresult"]["idlist"]
            .as_array()
            .and_then(|ids| ids.first())
            .and_then(|v| v.as_str())
            .map(str::to_string)
        else {
            return Vec::new();
        };
        let summary = [
            ("db", "pubmed"),
            ("id", pmid.as_str()),
            ("retmode", "json"),
            ("tool", "citefix"),
        ];
        let Ok(d2) = get_json(&self.rt, ESUMMARY, &summary, &[]) else {
            return Vec::new();
        };
        let rec = d2["result"][pmid.as_str()].clone();
        if rec.is_object() {
            self.rt.cache.put(self.id(), &key, rec.clone());
            normalize(&rec).into_iter().collect()
        } else {
            Vec::new()
        }
    }
}

pub(crate) fn normalize(rec: &Value) -> Option<Candidate> {
    let obj = rec.as_object()?;
    let mut c = Candidate::new(SourceId::Pubmed);
    let plain = |key: &str| -> String {
        obj.get(key)
            .and_then(|v| v.as_str())
            .map(normalize_text)
            .unwrap_or_default()
    };

    c.title = {
        let t = plain("title");
        if t.is_empty() { plain("sorttitle") } else { t }
    };
    if let Some(auths) = obj.get("authors").and_then(|v| v.as_array()) {
        c.authors = auths
            .iter()
            .filter_map(|a| a["name"].as_str())
            .map(normalize_text)
            .filter(|s| !s.is_empty())
            .collect();
    }
    c.journal_name = {
        let full = plain("fulljournalname");
        if full.is_empty() { plain("source") } else { full }
    };
    c.journal_abbrev = plain("source");
    c.doi = crate::text::normalize_doi(&plain("elocationid"));
    c.volume = plain("volume");
    c.issue = plain("issue");
    c.pages = plain("pages");
    c.year = plain("pubdate")
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string();
    c.raw = rec.clone();
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_esummary_record() {
        let rec = serde_json::json!({
            "title": "A Clinical Study.",
            "authors": [{"name": "Smith J"}, {"name": "Doe A"}],
            "fulljournalname": "The Lancet",
            "source": "Lancet",
            "elocationid": "doi: 10.1016/S0140-6736",
            "volume": "399",
            "issue": "10325",
            "pages": "629-55",
            "pubdate": "2022 Feb 12",
        });
        let c = normalize(&rec).unwrap();
        assert_eq!(c.journal_name, "The Lancet");
        assert_eq!(c.journal_abbrev, "Lancet");
        assert_eq!(c.doi, "10.1016/s0140-6736");
        assert_eq!(c.year, "2022");
        assert_eq!(c.authors.len(), 2);
    }
}
