//! OpenAlex works API.

use std::sync::Arc;

use serde_json::Value;

use crate::record::{Candidate, RefType, SourceId};
use crate::runtime::RuntimeResources;
use crate::source::{SourceClient, get_json};
use crate::text::normalize_text;

const BASE_URL: &str = "https://api.openalex.org/works";

pub struct OpenAlex {
    rt: Arc<RuntimeResources>,
}

impl OpenAlex {
    pub fn new(rt: Arc<RuntimeResources>) -> OpenAlex {
        OpenAlex { rt }
    }

    fn results(&self, cache_key: &str, query: &[(&str, &str)]) -> Vec<Candidate> {
        if let Some(cached) = self.rt.cache.get(self.id(), cache_key) {
            return to_candidates(&cached);
        }
        let Ok(data) = get_json(&self.rt, BASE_URL, query, &[]) else {
            return Vec::new();
        };
        let results = data["results"].clone();
        if results.is_array() {
            self.rt.cache.put(self.id(), cache_key, results.clone());
        }
        to_candidates(&results)
    }
}

impl SourceClient for OpenAlex {
    fn id(&self) -> SourceId {
        SourceId::OpenAlex
    }

    fn by_doi(&self, doi: &str) -> Vec<Candidate> {
        let filter = format!("doi:{doi}");
        let mut out = self.results(&format!("doi:{}", doi.to_lowercase()), &[("filter", &filter)]);
        out.truncate(1);
        out
    }

    fn by_title(&self, title: &str) -> Vec<Candidate> {
        let filter = format!("title.search:{title}");
        self.results(
            &format!("title:{}", title.to_lowercase()),
            &[("filter", &filter), ("per_page", "5")],
        )
    }
}

fn to_candidates(results: &Value) -> Vec<Candidate> {
    results
        .as_array()
        .map(|arr| arr.iter().take(5).filter_map(normalize).collect())
        .unwrap_or_default()
}

pub(crate) fn normalize(rec: &Value) -> Option<Candidate> {
    let obj = rec.as_object()?;
    let mut c = Candidate::new(SourceId::OpenAlex);

    c.title = obj
        .get("display_name")
        .or_else(|| obj.get("title"))
        .and_then(|v| v.as_str())
        .map(normalize_text)
        .unwrap_or_default();

    if let Some(auths) = obj.get("authorships").and_then(|v| v.as_array()) {
        c.authors = auths
            .iter()
            .filter_map(|a| a["author"]["display_name"].as_str())
            .map(normalize_text)
            .filter(|s| !s.is_empty())
            .collect();
    }

    let venue = &rec["host_venue"];
    c.journal_name = venue["display_name"]
        .as_str()
        .map(normalize_text)
        .unwrap_or_default();
    c.journal_abbrev = venue["abbrev"].as_str().map(normalize_text).unwrap_or_default();
    // OpenAlex DOIs arrive as https://doi.org/ URLs.
    c.doi = crate::text::normalize_doi(rec["doi"].as_str().unwrap_or(""));

    let biblio = &rec["biblio"];
    c.volume = biblio["volume"].as_str().map(normalize_text).unwrap_or_default();
    c.issue = biblio["issue"].as_str().map(normalize_text).unwrap_or_default();
    let fp = biblio["first_page"].as_str().unwrap_or("");
    let lp = biblio["last_page"].as_str().unwrap_or("");
    c.pages = if !fp.is_empty() && !lp.is_empty() {
        format!("{fp}-{lp}")
    } else {
        normalize_text(fp)
    };

    if let Some(y) = rec["publication_year"].as_i64() {
        c.year = y.to_string();
    } else if let Some(d) = rec["from_publication_date"].as_str() {
        c.year = d.chars().take(4).collect();
    }

    if c.journal_name.to_lowercase().contains("proceedings") {
        c.type_votes.push(RefType::ConferencePaper);
    }
    c.raw = rec.clone();
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_openalex_work() {
        let rec = serde_json::json!({
            "display_name": "A Study",
            "authorships": [
                {"author": {"display_name": "Ada Lovelace"}},
            ],
            "host_venue": {"display_name": "Proceedings of Something"},
            "doi": "https://doi.org/10.1234/abc",
            "biblio": {"volume": "7", "first_page": "10", "last_page": "20"},
            "publication_year": 2019,
        });
        let c = normalize(&rec).unwrap();
        assert_eq!(c.title, "A Study");
        assert_eq!(c.authors, vec!["Ada Lovelace"]);
        assert_eq!(c.doi, "10.1234/abc");
        assert_eq!(c.pages, "10-20");
        assert_eq!(c.year, "2019");
        assert_eq!(c.type_votes, vec![RefType::ConferencePaper]);
    }

    #[test]
    fn single_first_page_passes_through() {
        let rec = serde_json::json!({
            "title": "T",
            "biblio": {"first_page": "5338"},
        });
        let c = normalize(&rec).unwrap();
        assert_eq!(c.pages, "5338");
    }
}
