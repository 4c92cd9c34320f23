//! Bibliographic source clients. Each client speaks one upstream schema and
//! normalises its records into [`Candidate`]s; the fan-out step never sees a
//! raw payload. Lookup failures are absorbed here: a client that cannot
//! answer returns no candidates, never an error.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::record::{Candidate, SourceId};
use crate::runtime::RuntimeResources;

pub mod arxiv;
pub mod crossref;
pub mod ieeexplore;
pub mod openalex;
pub mod pubmed;
pub mod semanticscholar;

pub const DEFAULT_UA: &str = "citefix/0.1 (mailto:citefix@example.com)";

/// A bibliographic source. `by_doi` and `by_id` default to "not supported";
/// every source can at least search by title.
pub trait SourceClient: Send + Sync {
    fn id(&self) -> SourceId;

    fn by_doi(&self, _doi: &str) -> Vec<Candidate> {
        Vec::new()
    }

    fn by_title(&self, title: &str) -> Vec<Candidate>;

    /// Source-native identifier lookup (arXiv ids).
    fn by_id(&self, _id: &str) -> Vec<Candidate> {
        Vec::new()
    }
}

#[derive(Debug, Error)]
pub(crate) enum FetchError {
    #[error("transient upstream failure (status {0})")]
    Transient(u16),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

const RETRYABLE: &[u16] = &[429, 500, 502, 503, 504];
const MAX_TRANSIENT_ATTEMPTS: u32 = 4;
const MAX_OTHER_ATTEMPTS: u32 = 2;

fn backoff(attempt: u32) -> Duration {
    let base = 2u64.saturating_pow(attempt).min(8);
    Duration::from_millis(base * 1000 + 100 * attempt as u64)
}

fn attempt_get(
    rt: &RuntimeResources,
    url: &str,
    query: &[(&str, &str)],
    headers: &[(&str, String)],
) -> Result<String, FetchError> {
    let _permit = rt.limiter.acquire();
    let mut req = rt.agent.get(url).header("User-Agent", DEFAULT_UA);
    for (k, v) in headers {
        req = req.header(*k, v.as_str());
    }
    for (k, v) in query {
        req = req.query(*k, *v);
    }
    match req.call() {
        Ok(mut res) => res
            .body_mut()
            .read_to_string()
            .map_err(|e| FetchError::Other(e.into())),
        Err(ureq::Error::StatusCode(code)) if RETRYABLE.contains(&code) => {
            Err(FetchError::Transient(code))
        }
        Err(e) => Err(FetchError::Other(e.into())),
    }
}

/// GET a JSON document with bounded retry. Transient HTTP statuses get an
/// exponential backoff; everything else gets one short retry. The caller
/// treats a final error as "no result for this query".
pub(crate) fn get_json(
    rt: &RuntimeResources,
    url: &str,
    query: &[(&str, &str)],
    headers: &[(&str, String)],
) -> anyhow::Result<Value> {
    let mut attempt = 0u32;
    let body = loop {
        attempt += 1;
        match attempt_get(rt, url, query, headers) {
            Ok(body) => break body,
            Err(FetchError::Transient(code)) if attempt <= MAX_TRANSIENT_ATTEMPTS => {
                debug!(url, code, attempt, "transient upstream failure, backing off");
                std::thread::sleep(backoff(attempt));
            }
            Err(FetchError::Other(e)) if attempt <= MAX_OTHER_ATTEMPTS => {
                debug!(url, error = %e, attempt, "request failed, retrying once");
                std::thread::sleep(Duration::from_millis(300 * attempt as u64));
            }
            Err(e) => {
                warn!(url, error = %e, "giving up on query");
                return Err(anyhow::anyhow!("query failed: {e}"));
            }
        }
    };
    Ok(serde_json::from_str(&body)?)
}

/// Same retry discipline as [`get_json`], for non-JSON bodies (arXiv Atom).
pub(crate) fn get_text(
    rt: &RuntimeResources,
    url: &str,
    query: &[(&str, &str)],
    headers: &[(&str, String)],
) -> anyhow::Result<String> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match attempt_get(rt, url, query, headers) {
            Ok(body) => return Ok(body),
            Err(FetchError::Transient(code)) if attempt <= MAX_TRANSIENT_ATTEMPTS => {
                debug!(url, code, attempt, "transient upstream failure, backing off");
                std::thread::sleep(backoff(attempt));
            }
            Err(FetchError::Other(e)) if attempt <= MAX_OTHER_ATTEMPTS => {
                debug!(url, error = %e, attempt, "request failed, retrying once");
                std::thread::sleep(Duration::from_millis(300 * attempt as u64));
            }
            Err(e) => {
                warn!(url, error = %e, "giving up on query");
                return Err(anyhow::anyhow!("query failed: {e}"));
            }
        }
    }
}

/// The configured source set, in consensus authority order. IEEE Xplore
/// joins only when an API key is present.
pub fn default_sources(rt: &Arc<RuntimeResources>) -> Vec<Box<dyn SourceClient>> {
    let mut out: Vec<Box<dyn SourceClient>> = Vec::new();
    out.push(Box::new(crossref::Crossref::new(Arc::clone(rt))));
    if let Some(xplore) = ieeexplore::IeeeXplore::from_env(Arc::clone(rt)) {
        out.push(Box::new(xplore));
    }
    out.push(Box::new(openalex::OpenAlex::new(Arc::clone(rt))));
    out.push(Box::new(semanticscholar::SemanticScholar::new(Arc::clone(rt))));
    out.push(Box::new(pubmed::PubMed::new(Arc::clone(rt))));
    out.push(Box::new(arxiv::Arxiv::new(Arc::clone(rt))));
    out
}
