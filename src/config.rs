//! Environment-driven pipeline configuration, read once at startup.

use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Connect/read timeout for every outbound call.
    pub timeout: Duration,
    /// Maximum simultaneous in-flight requests across all invocations.
    pub concurrency: usize,
    pub cache_ttl: Duration,
    pub max_correction_rounds: u32,
    pub max_hops: u32,
    pub stagnation_patience: u32,
    /// Worker-pool size for the verification agents.
    pub agent_threads: usize,
    /// "openai", "ollama", "off" or "auto".
    pub llm_provider: String,
    pub openai_model: String,
    pub ollama_model: String,
    pub ollama_base: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            timeout: Duration::from_secs_f64(env_parse("CITEFIX_TIMEOUT", 12.0)),
            concurrency: env_parse("CITEFIX_CONCURRENCY", 8),
            cache_ttl: Duration::from_secs(env_parse("CITEFIX_CACHE_TTL", 3600)),
            max_correction_rounds: env_parse("CITEFIX_MAX_CORR", 3),
            max_hops: env_parse("CITEFIX_MAX_HOPS", 12),
            stagnation_patience: env_parse("CITEFIX_STAGNATION", 2),
            agent_threads: env_parse("CITEFIX_AGENT_THREADS", 6),
            llm_provider: env::var("CITEFIX_LLM").unwrap_or_else(|_| "auto".into()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            ollama_model: env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".into()),
            ollama_base: env::var("OLLAMA_BASE_URL")
                .or_else(|_| env::var("OLLAMA_HOST"))
                .unwrap_or_else(|_| "http://localhost:11434".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_finite() {
        let cfg = PipelineConfig::default();
        assert!(cfg.max_hops > 0);
        assert!(cfg.max_correction_rounds > 0);
        assert!(cfg.concurrency > 0);
        assert!(cfg.agent_threads > 0);
    }
}
