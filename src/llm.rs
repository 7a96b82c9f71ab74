//! Language model client.
//!
//! [`OpenAiGenerator`] implements the core [`Generator`] trait against the
//! OpenAI chat completions API. The rendered prompt is sent as a single
//! user message and the first choice's content is returned.

use anyhow::Result;
use async_trait::async_trait;
use notes_rag_core::error::SynthesisError;
use notes_rag_core::synthesize::Generator;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::embedding::API_KEY_VAR;

pub struct OpenAiGenerator {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
            api_key: std::env::var(API_KEY_VAR).ok().filter(|k| !k.is_empty()),
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                { "role": "user", "content": prompt }
            ],
        });
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    /// The client timeout also covers the body read, so a stalled body
    /// surfaces as a timeout from `json()` rather than from `send()`.
    fn request_error(&self, e: reqwest::Error, what: &str) -> SynthesisError {
        if e.is_timeout() {
            SynthesisError::Timeout(self.config.timeout_secs)
        } else {
            SynthesisError::Provider(format!("{}: {}", what, e))
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, SynthesisError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SynthesisError::MissingApiKey(API_KEY_VAR.to_string()))?;

        debug!(model = %self.config.model, "requesting chat completion");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| self.request_error(e, "request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Provider(format!(
                "OpenAI API error {}: {}",
                status, body
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.request_error(e, "invalid response body"))?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, SynthesisError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or(SynthesisError::EmptyResponse)
}
