//! Process-wide shared resources: the HTTP agent, a time-bounded response
//! cache and the outbound concurrency limiter. Built once at startup and
//! passed by `Arc` into every invocation; read-only after construction
//! apart from the interior-mutable cache and limiter.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::record::SourceId;

pub struct RuntimeResources {
    pub cfg: PipelineConfig,
    pub agent: ureq::Agent,
    pub cache: TtlCache,
    pub limiter: Semaphore,
}

impl RuntimeResources {
    pub fn new(cfg: PipelineConfig) -> RuntimeResources {
        let agent_cfg = ureq::Agent::config_builder()
            .timeout_connect(Some(cfg.timeout))
            .timeout_global(Some(cfg.timeout))
            .build();
        RuntimeResources {
            agent: ureq::Agent::new_with_config(agent_cfg),
            cache: TtlCache::new(cfg.cache_ttl),
            limiter: Semaphore::new(cfg.concurrency),
            cfg,
        }
    }
}

/// Best-effort lookup cache keyed by source and query. Entries expire after
/// the configured TTL; expired entries are dropped lazily on access.
pub struct TtlCache {
    ttl: Duration,
    entries: Mutex<HashMap<(SourceId, String), (Instant, serde_json::Value)>>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> TtlCache {
        TtlCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, source: SourceId, key: &str) -> Option<serde_json::Value> {
        let mut map = self.entries.lock().ok()?;
        match map.get(&(source, key.to_string())) {
            Some((at, v)) if at.elapsed() < self.ttl => Some(v.clone()),
            Some(_) => {
                map.remove(&(source, key.to_string()));
                None
            }
            None => None,
        }
    }

    pub fn put(&self, source: SourceId, key: &str, value: serde_json::Value) {
        if let Ok(mut map) = self.entries.lock() {
            map.insert((source, key.to_string()), (Instant::now(), value));
        }
    }
}

/// Counting semaphore bounding simultaneous outbound requests. The pack
/// offers no blocking semaphore crate, so this is the plain
/// mutex-and-condvar construction.
pub struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

pub struct Permit<'a> {
    sem: &'a Semaphore,
}

impl Semaphore {
    pub fn new(permits: usize) -> Semaphore {
        Semaphore {
            permits: Mutex::new(permits.max(1)),
            cv: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> Permit<'_> {
        let mut n = self
            .permits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *n == 0 {
            n = self
                .cv
                .wait(n)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *n -= 1;
        Permit { sem: self }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut n = self
            .sem
            .permits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *n += 1;
        self.sem.cv.notify_one();
    }
}
