//! Source fan-out: query every configured source by DOI, title variants and
//! preprint id, in parallel, and collect deduplicated candidates. The step
//! joins completely before consensus starts; a failed query contributes
//! nothing rather than failing the round.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::record::{Candidate, Draft, SourceId};
use crate::source::SourceClient;
use crate::text::{normalize_doi, normalize_text};

/// Up to three search strings per title: the full title, the prefix before
/// the first colon/dash when it is long enough to be distinctive, and a
/// 180-character cut for very long titles.
pub fn title_variants(title: &str) -> Vec<String> {
    let t = normalize_text(title);
    if t.is_empty() {
        return Vec::new();
    }
    let mut out = vec![t.clone()];
    if let Some(idx) = t.find([':', '-', '\u{2013}', '\u{2014}']) {
        let prefix = t[..idx].trim();
        if prefix.len() >= 6 {
            out.push(prefix.to_string());
        }
    }
    if t.chars().count() > 180 {
        out.push(t.chars().take(180).collect());
    }
    out.dedup();
    out
}

enum Query<'a> {
    Doi(&'a str),
    Title(&'a str),
    Id(&'a str),
}

/// Fan out across all sources. Each (source, query) pair runs on its own
/// scoped thread; the process-wide limiter inside the HTTP helper bounds
/// real concurrency.
pub fn lookup(sources: &[Box<dyn SourceClient>], draft: &Draft) -> Vec<Candidate> {
    let doi = normalize_doi(draft.doi.as_deref().unwrap_or(""));
    let title = normalize_text(draft.title.as_deref().unwrap_or(""));
    let arxiv_id = normalize_text(draft.arxiv_id.as_deref().unwrap_or(""));
    let variants = title_variants(&title);

    let mut tasks: Vec<(&dyn SourceClient, Query<'_>)> = Vec::new();
    for s in sources {
        if !arxiv_id.is_empty() && s.id() == SourceId::Arxiv {
            tasks.push((s.as_ref(), Query::Id(&arxiv_id)));
        }
        if !doi.is_empty() {
            tasks.push((s.as_ref(), Query::Doi(&doi)));
        }
        for v in &variants {
            tasks.push((s.as_ref(), Query::Title(v)));
        }
    }

    let collected: Mutex<Vec<Candidate>> = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for (client, query) in &tasks {
            let collected = &collected;
            scope.spawn(move || {
                let found = match query {
                    Query::Doi(d) => client.by_doi(d),
                    Query::Title(t) => client.by_title(t),
                    Query::Id(i) => client.by_id(i),
                };
                if !found.is_empty()
                    && let Ok(mut all) = collected.lock()
                {
                    all.extend(found);
                }
            });
        }
    });

    let all = collected
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let deduped = dedupe(all);
    debug!(candidates = deduped.len(), "fan-out complete");
    deduped
}

/// Keep one candidate per `(source, doi-or-title)`; a later duplicate
/// replaces an earlier one in place.
fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut index: HashMap<(SourceId, String), usize> = HashMap::new();
    let mut out: Vec<Candidate> = Vec::new();
    for c in candidates {
        let key = c.dedupe_key();
        match index.get(&key) {
            Some(&i) => out[i] = c,
            None => {
                index.insert(key, out.len());
                out.push(c);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_full_prefix_and_cut() {
        let v = title_variants("Attention is all you need: a study");
        assert_eq!(
            v,
            vec![
                "Attention is all you need: a study".to_string(),
                "Attention is all you need".to_string(),
            ]
        );

        let long = "x".repeat(200);
        let v = title_variants(&long);
        assert_eq!(v.len(), 2);
        assert_eq!(v[1].chars().count(), 180);
    }

    #[test]
    fn short_prefix_is_not_a_variant() {
        // "BERT" before the colon is under six characters.
        let v = title_variants("BERT: pre-training of deep bidirectional transformers");
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn empty_title_no_variants() {
        assert!(title_variants("  ").is_empty());
    }

    #[test]
    fn dedupe_keeps_last_per_key() {
        let mut a = Candidate::new(SourceId::Crossref);
        a.doi = "10.1/x".into();
        a.year = "2015".into();
        let mut b = a.clone();
        b.year = "2016".into();
        let mut other = Candidate::new(SourceId::OpenAlex);
        other.doi = "10.1/x".into();

        let out = dedupe(vec![a, b, other]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].year, "2016");
    }
}
