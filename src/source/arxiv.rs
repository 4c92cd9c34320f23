//! arXiv Atom API (preprint archive). The only source with a native-id
//! lookup; every record votes "preprint".

use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::record::{Candidate, RefType, SourceId};
use crate::runtime::RuntimeResources;
use crate::source::{SourceClient, get_text};
use crate::text::normalize_text;

const BASE_URL: &str = "https://export.arxiv.org/api/query";

pub struct Arxiv {
    rt: Arc<RuntimeResources>,
}

impl Arxiv {
    pub fn new(rt: Arc<RuntimeResources>) -> Arxiv {
        Arxiv { rt }
    }

    fn query(&self, cache_key: &str, query: &[(&str, &str)]) -> Vec<Candidate> {
        if let Some(cached) = self.rt.cache.get(self.id(), cache_key)
            && let Some(xml) = cached.as_str()
        {
            return parse_atom(xml).into_iter().collect();
        }
        let headers = [("Accept", "application/atom+xml".to_string())];
        let Ok(xml) = get_text(&self.rt, BASE_URL, query, &headers) else {
            return Vec::new();
        };
        self.rt
            .cache
            .put(self.id(), cache_key, serde_json::Value::String(xml.clone()));
        parse_atom(&xml).into_iter().collect()
    }
}

impl SourceClient for Arxiv {
    fn id(&self) -> SourceId {
        SourceId::Arxiv
    }

    fn by_title(&self, title: &str) -> Vec<Candidate> {
        let q = format!("ti:\"{title}\"");
        self.query(
            &format!("title:{}", title.to_lowercase()),
            &[("search_query", &q), ("start", "0"), ("max_results", "1")],
        )
    }

    fn by_id(&self, id: &str) -> Vec<Candidate> {
        self.query(&format!("id:{id}"), &[("id_list", id), ("max_results", "1")])
    }
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// Pull the first `<entry>` out of an Atom feed. The feed itself carries a
/// `<title>` too, so only text inside an entry counts.
pub(crate) fn parse_atom(xml: &str) -> Option<Candidate> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut c = Candidate::new(SourceId::Arxiv);
    c.journal_name = "arXiv".into();
    c.journal_abbrev = "arXiv".into();
    c.type_votes.push(RefType::Preprint);

    let mut in_entry = false;
    let mut in_author = false;
    let mut current: Vec<u8> = Vec::new();
    let mut found = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(e)) => {
                let name = e.name();
                let tag = local_name(name.as_ref());
                if tag == b"entry" {
                    if found {
                        break;
                    }
                    in_entry = true;
                    found = true;
                } else if in_entry && tag == b"author" {
                    in_author = true;
                }
                current = tag.to_vec();
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let tag = local_name(name.as_ref());
                if tag == b"entry" {
                    in_entry = false;
                } else if tag == b"author" {
                    in_author = false;
                }
                current.clear();
            }
            Ok(Event::Text(t)) => {
                if !in_entry {
                    buf.clear();
                    continue;
                }
                let text = t.xml_content().unwrap_or_default().to_string();
                match current.as_slice() {
                    b"title" => c.title = normalize_text(&text),
                    b"name" if in_author => {
                        let n = normalize_text(&text);
                        if !n.is_empty() {
                            c.authors.push(n);
                        }
                    }
                    b"published" => {
                        c.year = text.chars().take(4).collect();
                    }
                    b"doi" => c.doi = crate::text::normalize_doi(&text),
                    _ => {}
                }
            }
            _ => {}
        }
        buf.clear();
    }

    found.then_some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title>ArXiv Query Results</title>
  <entry>
    <title>Deep Residual Learning
      for Image Recognition</title>
    <published>2015-12-10T18:00:00Z</published>
    <author><name>Kaiming He</name></author>
    <author><name>Xiangyu Zhang</name></author>
    <arxiv:doi>10.48550/arXiv.1512.03385</arxiv:doi>
  </entry>
  <entry>
    <title>Second Entry Ignored</title>
  </entry>
</feed>"#;

    #[test]
    fn parses_first_entry_only() {
        let c = parse_atom(FEED).unwrap();
        assert_eq!(c.title, "Deep Residual Learning for Image Recognition");
        assert_eq!(c.authors, vec!["Kaiming He", "Xiangyu Zhang"]);
        assert_eq!(c.year, "2015");
        assert_eq!(c.doi, "10.48550/arxiv.1512.03385");
        assert_eq!(c.journal_name, "arXiv");
        assert_eq!(c.type_votes, vec![RefType::Preprint]);
    }

    #[test]
    fn feed_without_entries_is_none() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>empty</title></feed>"#;
        assert!(parse_atom(xml).is_none());
    }
}
