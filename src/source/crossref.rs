//! Crossref works API: the DOI registry, highest-authority source.

use std::sync::Arc;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde_json::Value;

use crate::record::{Candidate, RefType, SourceId};
use crate::runtime::RuntimeResources;
use crate::source::{SourceClient, get_json};
use crate::text::normalize_text;

const BASE_URL: &str = "https://api.crossref.org/works";
const SELECT_FIELDS: &str = "title,author,container-title,short-container-title,issued,DOI,page,volume,issue,published-print,published-online,type";

const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub struct Crossref {
    rt: Arc<RuntimeResources>,
}

impl Crossref {
    pub fn new(rt: Arc<RuntimeResources>) -> Crossref {
        Crossref { rt }
    }
}

impl SourceClient for Crossref {
    fn id(&self) -> SourceId {
        SourceId::Crossref
    }

    fn by_doi(&self, doi: &str) -> Vec<Candidate> {
        let key = format!("doi:{}", doi.to_lowercase());
        if let Some(cached) = self.rt.cache.get(self.id(), &key) {
            return normalize(&cached).into_iter().collect();
        }
        let enc = utf8_percent_encode(doi, PATH_SEGMENT_ENCODE_SET).to_string();
        let Ok(data) = get_json(&self.rt, &format!("{BASE_URL}/{enc}"), &[], &[]) else {
            return Vec::new();
        };
        match data.get("message") {
            Some(msg) if msg.is_object() => {
                self.rt.cache.put(self.id(), &key, msg.clone());
                normalize(msg).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    fn by_title(&self, title: &str) -> Vec<Candidate> {
        let key = format!("title:{}", title.to_lowercase());
        if let Some(cached) = self.rt.cache.get(self.id(), &key) {
            return items_to_candidates(&cached);
        }
        let query = [
            ("query.title", title),
            ("rows", "5"),
            ("select", SELECT_FIELDS),
        ];
        let Ok(data) = get_json(&self.rt, BASE_URL, &query, &[]) else {
            return Vec::new();
        };
        let items = data["message"]["items"].clone();
        if items.is_array() {
            self.rt.cache.put(self.id(), &key, items.clone());
        }
        items_to_candidates(&items)
    }
}

fn items_to_candidates(items: &Value) -> Vec<Candidate> {
    items
        .as_array()
        .map(|arr| arr.iter().take(5).filter_map(normalize).collect())
        .unwrap_or_default()
}

/// Crossref schema: list-valued titles, `author` given/family pairs,
/// `date-parts` dates, `page` ranges.
pub(crate) fn normalize(rec: &Value) -> Option<Candidate> {
    let obj = rec.as_object()?;
    let mut c = Candidate::new(SourceId::Crossref);

    let first_str = |key: &str| -> String {
        obj.get(key)
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
            .map(normalize_text)
            .unwrap_or_default()
    };
    let plain = |key: &str| -> String {
        obj.get(key)
            .and_then(|v| v.as_str())
            .map(normalize_text)
            .unwrap_or_default()
    };

    c.title = first_str("title");
    c.journal_name = first_str("container-title");
    c.journal_abbrev = first_str("short-container-title");
    c.volume = plain("volume");
    c.issue = plain("issue");
    c.pages = plain("page");
    c.doi = plain("DOI");

    if let Some(authors) = obj.get("author").and_then(|v| v.as_array()) {
        c.authors = authors
            .iter()
            .map(|a| {
                let given = a["given"].as_str().unwrap_or("");
                let family = a["family"].as_str().unwrap_or("");
                normalize_text(&format!("{given} {family}"))
            })
            .filter(|s| !s.is_empty())
            .collect();
    }

    // First populated date block wins, print before online.
    for src in ["issued", "published-print", "published-online"] {
        if let Some(parts) = obj
            .get(src)
            .and_then(|v| v.get("date-parts"))
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|v| v.as_array())
        {
            if let Some(y) = parts.first().and_then(|v| v.as_i64()) {
                c.year = y.to_string();
            }
            if let Some(m) = parts.get(1).and_then(|v| v.as_i64()) {
                c.month = m.to_string();
            }
            if !c.year.is_empty() {
                break;
            }
        }
    }

    let cr_type = plain("type");
    if !cr_type.is_empty() {
        c.type_votes.push(RefType::from_label(&cr_type));
    }
    c.raw = rec.clone();
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_crossref_message() {
        let rec = serde_json::json!({
            "title": ["Deep Residual Learning for Image Recognition"],
            "author": [
                {"given": "Kaiming", "family": "He"},
                {"given": "Xiangyu", "family": "Zhang"},
            ],
            "container-title": ["2016 IEEE Conference on Computer Vision and Pattern Recognition (CVPR)"],
            "DOI": "10.1109/cvpr.2016.90",
            "page": "770-778",
            "issued": {"date-parts": [[2016, 6]]},
            "type": "proceedings-article",
        });
        let c = normalize(&rec).unwrap();
        assert_eq!(c.source, SourceId::Crossref);
        assert_eq!(c.title, "Deep Residual Learning for Image Recognition");
        assert_eq!(c.authors, vec!["Kaiming He", "Xiangyu Zhang"]);
        assert_eq!(c.doi, "10.1109/cvpr.2016.90");
        assert_eq!(c.pages, "770-778");
        assert_eq!(c.year, "2016");
        assert_eq!(c.month, "6");
        assert_eq!(c.type_votes, vec![RefType::ConferencePaper]);
    }

    #[test]
    fn tolerates_sparse_records() {
        let c = normalize(&serde_json::json!({"DOI": "10.1000/182"})).unwrap();
        assert_eq!(c.doi, "10.1000/182");
        assert!(c.title.is_empty());
        assert!(c.authors.is_empty());
        assert!(normalize(&serde_json::json!("not an object")).is_none());
    }
}
