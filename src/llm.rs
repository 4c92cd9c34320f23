//! Language-model adapter. The pipeline only ever sees the [`Llm`] trait:
//! `json()` returns an object or `{}`, `text()` returns a line or `""`.
//! No call site may observe an error; every failure degrades to the empty
//! result and the regex/rule-based fallbacks take over downstream.

use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::warn;

use crate::config::PipelineConfig;

pub trait Llm: Send + Sync {
    /// Strict-JSON completion. Must return `{}` on any failure.
    fn json(&self, prompt: &str) -> Value;
    /// Plain-text completion. Must return `""` on any failure.
    fn text(&self, prompt: &str) -> String;
}

/// No-provider stand-in; makes every LLM-first stage take its fallback.
pub struct DisabledLlm;

impl Llm for DisabledLlm {
    fn json(&self, _prompt: &str) -> Value {
        static EMPTY: Lazy<Value> = Lazy::new(|| serde_json::json!({}));
        EMPTY.clone()
    }
    fn text(&self, _prompt: &str) -> String {
        String::new()
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum Provider {
    OpenAi,
    Ollama,
    Off,
}

pub struct LlmAdapter {
    provider: Provider,
    agent: ureq::Agent,
    openai_model: String,
    ollama_model: String,
    ollama_base: String,
}

impl LlmAdapter {
    pub fn new(cfg: &PipelineConfig) -> LlmAdapter {
        let provider = match cfg.llm_provider.as_str() {
            "openai" => Provider::OpenAi,
            "ollama" => Provider::Ollama,
            "off" | "none" | "dummy" => Provider::Off,
            _ => {
                if std::env::var("OPENAI_API_KEY").is_ok() {
                    Provider::OpenAi
                } else if std::env::var("OLLAMA_BASE_URL").is_ok()
                    || std::env::var("OLLAMA_HOST").is_ok()
                {
                    Provider::Ollama
                } else {
                    Provider::Off
                }
            }
        };
        let agent_cfg = ureq::Agent::config_builder()
            .timeout_connect(Some(cfg.timeout))
            .timeout_global(Some(cfg.timeout))
            .build();
        LlmAdapter {
            provider,
            agent: ureq::Agent::new_with_config(agent_cfg),
            openai_model: cfg.openai_model.clone(),
            ollama_model: cfg.ollama_model.clone(),
            ollama_base: cfg.ollama_base.clone(),
        }
    }

    pub fn available(&self) -> bool {
        self.provider != Provider::Off
    }

    fn openai_complete(&self, system: &str, prompt: &str, json_mode: bool) -> anyhow::Result<String> {
        let key = std::env::var("OPENAI_API_KEY")?;
        let base = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into());
        let mut body = serde_json::json!({
            "model": self.openai_model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.1,
            "top_p": 0.1,
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        let raw: String = self
            .agent
            .post(format!("{base}/chat/completions"))
            .header("Authorization", format!("Bearer {key}"))
            .header("Content-Type", "application/json")
            .send(body.to_string())?
            .body_mut()
            .read_to_string()?;
        let v: Value = serde_json::from_str(&raw)?;
        let content = v["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing completion content"))?;
        Ok(content.to_string())
    }

    fn ollama_complete(&self, prelude: &str, prompt: &str) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.ollama_model,
            "prompt": format!("{prelude}\n\n{prompt}"),
            "stream": false,
        });
        let raw: String = self
            .agent
            .post(format!("{}/api/generate", self.ollama_base.trim_end_matches('/')))
            .header("Content-Type", "application/json")
            .send(body.to_string())?
            .body_mut()
            .read_to_string()?;
        let v: Value = serde_json::from_str(&raw)?;
        Ok(v["response"].as_str().unwrap_or_default().to_string())
    }

    fn complete(&self, system: &str, prompt: &str, json_mode: bool) -> anyhow::Result<String> {
        match self.provider {
            Provider::OpenAi => self.openai_complete(system, prompt, json_mode),
            Provider::Ollama => self.ollama_complete(system, prompt),
            Provider::Off => Ok(String::new()),
        }
    }
}

impl Llm for LlmAdapter {
    fn json(&self, prompt: &str) -> Value {
        match self.complete("Return STRICT JSON only. No prose.", prompt, true) {
            Ok(raw) => salvage_json(&raw).unwrap_or_else(|| serde_json::json!({})),
            Err(e) => {
                warn!(error = %e, "llm json call failed");
                serde_json::json!({})
            }
        }
    }

    fn text(&self, prompt: &str) -> String {
        match self.complete("Follow the instructions exactly.", prompt, false) {
            Ok(raw) => raw.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "llm text call failed");
                String::new()
            }
        }
    }
}

/// Pull the first balanced JSON object out of a possibly chatty completion.
/// Tracks string/escape state so braces inside string literals do not count.
pub fn salvage_json(s: &str) -> Option<Value> {
    let s = s.trim();
    if s.starts_with('{')
        && let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(s)
    {
        return Some(v);
    }
    let bytes: Vec<char> = s.chars().collect();
    let mut depth = 0usize;
    let mut in_str = false;
    let mut esc = false;
    let mut start = None;
    for (j, &ch) in bytes.iter().enumerate() {
        if in_str {
            if esc {
                esc = false;
            } else if ch == '\\' {
                esc = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }
        match ch {
            '"' => in_str = true,
            '{' => {
                if depth == 0 {
                    start = Some(j);
                }
                depth += 1;
            }
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0
                    && let Some(i) = start
                {
                    let cand: String = bytes[i..=j].iter().collect();
                    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&cand) {
                        return Some(v);
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salvage_plain_object() {
        let v = salvage_json(r#"{"title": "x"}"#).unwrap();
        assert_eq!(v["title"], "x");
    }

    #[test]
    fn salvage_from_chatty_output() {
        let v = salvage_json(r#"Sure! Here is the JSON: {"year": "2015", "note": "a {brace} in string"} done"#)
            .unwrap();
        assert_eq!(v["year"], "2015");
    }

    #[test]
    fn salvage_rejects_non_objects() {
        assert!(salvage_json("[1, 2, 3]").is_none());
        assert!(salvage_json("no json here").is_none());
        assert!(salvage_json("{broken").is_none());
    }

    #[test]
    fn disabled_llm_is_empty() {
        let llm = DisabledLlm;
        assert_eq!(llm.json("anything"), serde_json::json!({}));
        assert_eq!(llm.text("anything"), "");
    }
}
