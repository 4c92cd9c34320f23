//! Semantic Scholar graph API (citation-graph index).

use std::sync::Arc;

use serde_json::Value;

use crate::record::{Candidate, RefType, SourceId};
use crate::runtime::RuntimeResources;
use crate::source::{SourceClient, get_json};
use crate::text::normalize_text;

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1/paper";
const FIELDS: &str = "title,venue,year,authors,externalIds,publicationVenue,publicationTypes";

pub struct SemanticScholar {
    rt: Arc<RuntimeResources>,
    api_key: Option<String>,
}

impl SemanticScholar {
    pub fn new(rt: Arc<RuntimeResources>) -> SemanticScholar {
        SemanticScholar {
            rt,
            api_key: std::env::var("SEMANTIC_SCHOLAR_API_KEY").ok(),
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        match &self.api_key {
            Some(k) => vec![("x-api-key", k.clone())],
            None => Vec::new(),
        }
    }
}

impl SourceClient for SemanticScholar {
    fn id(&self) -> SourceId {
        SourceId::SemanticScholar
    }

    fn by_doi(&self, doi: &str) -> Vec<Candidate> {
        let key = format!("doi:{}", doi.to_lowercase());
        if let Some(cached) = self.rt.cache.get(self.id(), &key) {
            return normalize(&cached).into_iter().collect();
        }
        let url = format!("{BASE_URL}/DOI:{doi}");
        let Ok(data) = get_json(&self.rt, &url, &[("fields", FIELDS)], &self.headers()) else {
            return Vec::new();
        };
        if data.get("error").is_some() || !data.is_object() {
            return Vec::new();
        }
        self.rt.cache.put(self.id(), &key, data.clone());
        normalize(&data).into_iter().collect()
    }

    fn by_title(&self, title: &str) -> Vec<Candidate> {
        let url = format!("{BASE_URL}/search");
        let query = [("query", title), ("limit", "5"), ("fields", FIELDS)];
        let Ok(data) = get_json(&self.rt, &url, &query, &self.headers()) else {
            return Vec::new();
        };
        data["data"]
            .as_array()
            .map(|arr| arr.iter().take(5).filter_map(normalize).collect())
            .unwrap_or_default()
    }
}

pub(crate) fn normalize(rec: &Value) -> Option<Candidate> {
    let obj = rec.as_object()?;
    let mut c = Candidate::new(SourceId::SemanticScholar);

    c.title = obj
        .get("title")
        .and_then(|v| v.as_str())
        .map(normalize_text)
        .unwrap_or_default();
    if let Some(auths) = obj.get("authors").and_then(|v| v.as_array()) {
        c.authors = auths
            .iter()
            .filter_map(|a| a["name"].as_str())
            .map(normalize_text)
            .filter(|s| !s.is_empty())
            .collect();
    }
    c.journal_name = obj
        .get("venue")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(normalize_text)
        .or_else(|| rec["publicationVenue"]["name"].as_str().map(normalize_text))
        .unwrap_or_default();
    c.doi = rec["externalIds"]["DOI"]
        .as_str()
        .or_else(|| rec["doi"].as_str())
        .map(|d| crate::text::normalize_doi(d))
        .unwrap_or_default();
    if let Some(y) = rec["year"].as_i64() {
        c.year = y.to_string();
    }

    if let Some(types) = obj.get("publicationTypes").and_then(|v| v.as_array()) {
        for t in types.iter().filter_map(|t| t.as_str()) {
            let t = t.to_lowercase();
            if t.contains("conference") {
                c.type_votes.push(RefType::ConferencePaper);
            } else if t.contains("journal") {
                c.type_votes.push(RefType::JournalArticle);
            } else if t.contains("book") {
                c.type_votes.push(RefType::Book);
            }
        }
    }
    c.raw = rec.clone();
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_s2_paper() {
        let rec = serde_json::json!({
            "title": "Attention Is All You Need",
            "authors": [{"name": "Ashish Vaswani"}],
            "venue": "NeurIPS",
            "year": 2017,
            "externalIds": {"DOI": "10.5555/3295222"},
            "publicationTypes": ["JournalArticle", "Conference"],
        });
        let c = normalize(&rec).unwrap();
        assert_eq!(c.title, "Attention Is All You Need");
        assert_eq!(c.doi, "10.5555/3295222");
        assert_eq!(c.year, "2017");
        assert!(c.type_votes.contains(&RefType::ConferencePaper));
        assert!(c.type_votes.contains(&RefType::JournalArticle));
    }

    #[test]
    fn falls_back_to_publication_venue() {
        let rec = serde_json::json!({
            "title": "T",
            "venue": "",
            "publicationVenue": {"name": "Some Journal"},
        });
        let c = normalize(&rec).unwrap();
        assert_eq!(c.journal_name, "Some Journal");
    }
}
