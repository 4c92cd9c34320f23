//! IEEE Xplore metadata API. Optional: only constructed when
//! `IEEE_API_KEY` is set. High authority for IEEE venues.

use std::sync::Arc;

use serde_json::Value;

use crate::record::{Candidate, SourceId};
use crate::runtime::RuntimeResources;
use crate::source::{SourceClient, get_json};
use crate::text::normalize_text;

const BASE_URL: &str = "https://ieeexploreapi.ieee.org/api/v1/search/articles";

pub struct IeeeXplore {
    rt: Arc<RuntimeResources>,
    api_key: String,
}

impl IeeeXplore {
    pub fn from_env(rt: Arc<RuntimeResources>) -> Option<IeeeXplore> {
        let api_key = std::env::var("IEEE_API_KEY").ok()?;
        if api_key.is_empty() {
            return None;
        }
        Some(IeeeXplore { rt, api_key })
    }

    fn search(&self, cache_key: &str, param: (&str, &str)) -> Vec<Candidate> {
        if let Some(cached) = self.rt.cache.get(self.id(), cache_key) {
            return articles_to_candidates(&cached);
        }
        let query = [
            param,
            ("apikey", self.api_key.as_str()),
            ("format", "json"),
            ("max_records", "3"),
            ("start_record", "1"),
        ];
        let Ok(data) = get_json(&self.rt, BASE_URL, &query, &[]) else {
            return Vec::new();
        };
        let articles = data["articles"].clone();
        if articles.is_array() {
            self.rt.cache.put(self.id(), cache_key, articles.clone());
        }
        articles_to_candidates(&articles)
    }
}

impl SourceClient for IeeeXplore {
    fn id(&self) -> SourceId {
        SourceId::IeeeXplore
    }

    fn by_doi(&self, doi: &str) -> Vec<Candidate> {
        let mut out = self.search(&format!("doi:{}", doi.to_lowercase()), ("doi", doi));
        out.truncate(1);
        out
    }

    fn by_title(&self, title: &str) -> Vec<Candidate> {
        self.search(
            &format!("title:{}", title.to_lowercase()),
            ("article_title", title),
        )
    }
}

fn articles_to_candidates(articles: &Value) -> Vec<Candidate> {
    articles
        .as_array()
        .map(|arr| arr.iter().take(3).filter_map(normalize).collect())
        .unwrap_or_default()
}

pub(crate) fn normalize(art: &Value) -> Option<Candidate> {
    let obj = art.as_object()?;
    let mut c = Candidate::new(SourceId::IeeeXplore);
    let plain = |key: &str| -> String {
        obj.get(key)
            .map(|v| match v {
                Value::String(s) => normalize_text(s),
                Value::Number(n) => n.to_string(),
                _ => String::new(),
            })
            .unwrap_or_default()
    };

    c.title = {
        let t = plain("title");
        if t.is_empty() { plain("htmlTitle") } else { t }
    };
    if let Some(auths) = art["authors"]["authors"].as_array() {
        c.authors = auths
            .iter()
            .filter_map(|a| a["full_name"].as_str().or_else(|| a["preferred_name"].as_str()))
            .map(normalize_text)
            .filter(|s| !s.is_empty())
            .collect();
    }
    c.journal_name = plain("publication_title");
    c.volume = plain("volume");
    c.issue = plain("issue");
    let sp = plain("start_page");
    let ep = plain("end_page");
    c.pages = if !sp.is_empty() && !ep.is_empty() {
        format!("{sp}-{ep}")
    } else {
        sp + &ep
    };
    c.doi = plain("doi");
    c.year = plain("publication_year");
    c.raw = art.clone();
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_xplore_article() {
        let art = serde_json::json!({
            "title": "Deep Residual Learning for Image Recognition",
            "authors": {"authors": [{"full_name": "Kaiming He"}]},
            "publication_title": "2016 IEEE Conference on Computer Vision and Pattern Recognition (CVPR)",
            "volume": "",
            "start_page": "770",
            "end_page": "778",
            "doi": "10.1109/CVPR.2016.90",
            "publication_year": 2016,
        });
        let c = normalize(&art).unwrap();
        assert_eq!(c.source, SourceId::IeeeXplore);
        assert_eq!(c.pages, "770-778");
        assert_eq!(c.year, "2016");
        assert_eq!(c.authors, vec!["Kaiming He"]);
    }
}
