use async_trait::async_trait;
use serde::Deserialize;

use ragd_protocol::api::LlmUsage;
use ragd_protocol::ApiError;

use crate::embedding::Result;

/// Options for one completion call.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            system: None,
            temperature: 0.3,
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: LlmUsage,
}

/// External LLM contract: prompt in, completion out.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> Result<Completion>;
}

/// Client for Ollama's `/api/generate` endpoint.
pub struct OllamaLlm {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

impl OllamaLlm {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaLlm {
    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> Result<Completion> {
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": opts.temperature,
                "num_predict": opts.max_tokens,
            },
        });
        if let Some(system) = &opts.system {
            body["system"] = serde_json::Value::String(system.clone());
        }

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::external("llm", e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ApiError::RateLimit {
                service: "llm".into(),
                retry_after_secs: None,
            });
        }
        if !status.is_success() {
            return Err(ApiError::external("llm", format!("generate returned {status}")));
        }

        let body: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| ApiError::external("llm", format!("invalid response: {e}")))?;

        Ok(Completion {
            text: body.response,
            usage: LlmUsage {
                prompt_tokens: body.prompt_eval_count,
                completion_tokens: body.eval_count,
            },
        })
    }
}

/// Canned-response LLM for tests: returns the configured text regardless of
/// the prompt and records nothing.
pub struct StaticLlm {
    pub response: String,
}

impl StaticLlm {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for StaticLlm {
    async fn complete(&self, _prompt: &str, _opts: &CompletionOptions) -> Result<Completion> {
        Ok(Completion {
            text: self.response.clone(),
            usage: LlmUsage::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_llm_echoes_configured_text() {
        let llm = StaticLlm::new("grounded answer");
        let completion = llm
            .complete("anything", &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(completion.text, "grounded answer");
    }

    #[test]
    fn test_default_options_match_ask_contract() {
        let opts = CompletionOptions::default();
        assert_eq!(opts.temperature, 0.3);
        assert_eq!(opts.max_tokens, 2048);
    }
}
