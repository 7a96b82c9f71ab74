//! Embedding providers backed by remote APIs, plus provider selection.
//!
//! The [`Embedder`] trait, the offline [`HashingEmbedder`], and the vector
//! helpers live in `notes_rag_core::embedding`. This module adds:
//! - **[`OpenAiEmbedder`]**: calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`create_embedder`]**: picks an implementation from `[embedding].provider`.
//!
//! ```rust,no_run
//! # use notes_rag::config::EmbeddingConfig;
//! # use notes_rag::embedding::create_embedder;
//! # use notes_rag_core::embedding::Embedder;
//! let config = EmbeddingConfig {
//!     provider: "disabled".to_string(),
//!     ..EmbeddingConfig::default()
//! };
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use notes_rag_core::embedding::{check_vectors, DisabledEmbedder, Embedder, HashingEmbedder};
use notes_rag_core::error::EmbeddingError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {base_url}/embeddings`. The API key is read from
/// `OPENAI_API_KEY` at construction; a missing key only fails when an
/// embedding is actually requested, so commands that never embed still run.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
            api_key: std::env::var(API_KEY_VAR).ok().filter(|k| !k.is_empty()),
        })
    }

    /// Replace the key read from the environment.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.config.base_url.trim_end_matches('/'))
    }

    /// One API call with retry/backoff.
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| EmbeddingError::MissingApiKey(API_KEY_VAR.to_string()))?;

        let body = serde_json::json!({
            "model": self.config.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(self.endpoint())
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = match response.json().await {
                            Ok(json) => json,
                            // Body read hit the client timeout; same as a failed send
                            Err(e) if e.is_timeout() => {
                                warn!(error = %e, attempt, "embedding response timed out");
                                last_err = Some(EmbeddingError::Request(e.to_string()));
                                continue;
                            }
                            Err(e) => return Err(EmbeddingError::InvalidResponse(e.to_string())),
                        };
                        return parse_openai_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = EmbeddingError::Provider {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(status = status.as_u16(), attempt, "embedding provider error");
                        last_err = Some(err);
                        continue;
                    }

                    // Client error (not 429), fail fast
                    return Err(err);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "embedding request failed");
                    last_err = Some(EmbeddingError::Request(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            EmbeddingError::Request("embedding failed after retries".to_string())
        }))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dims(&self) -> usize {
        self.config.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let batch_vectors = self.request(batch).await?;
            check_vectors(&batch_vectors, batch.len(), self.config.dims)?;
            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays, ordered by their `index` field.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        EmbeddingError::InvalidResponse("missing data array".to_string())
    })?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbeddingError::InvalidResponse("missing embedding".to_string()))?;

        let vec = embedding
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    EmbeddingError::InvalidResponse("non-numeric embedding value".to_string())
                })
            })
            .collect::<Result<Vec<f32>, _>>()?;

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vec));
    }

    // Sort by index to ensure order matches input
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Create an embedder based on `[embedding].provider`.
///
/// # Errors
///
/// Returns an error for unknown provider names or if the HTTP client
/// cannot be built.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dims))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] },
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn parse_rejects_malformed_payloads() {
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
        assert!(parse_openai_response(&serde_json::json!({ "data": [{}] })).is_err());
        assert!(parse_openai_response(&serde_json::json!({
            "data": [{ "embedding": ["x"] }]
        }))
        .is_err());
    }

    #[test]
    fn create_embedder_by_provider() {
        let mut config = EmbeddingConfig {
            provider: "hashing".to_string(),
            dims: 32,
            ..EmbeddingConfig::default()
        };
        let e = create_embedder(&config).unwrap();
        assert_eq!(e.model_name(), "hashing");
        assert_eq!(e.dims(), 32);

        config.provider = "disabled".to_string();
        assert_eq!(create_embedder(&config).unwrap().model_name(), "disabled");

        config.provider = "openai".to_string();
        config.model = "text-embedding-3-small".to_string();
        assert_eq!(
            create_embedder(&config).unwrap().model_name(),
            "text-embedding-3-small"
        );

        config.provider = "nope".to_string();
        assert!(create_embedder(&config).is_err());
    }

    #[tokio::test]
    async fn missing_key_fails_on_use() {
        let embedder = OpenAiEmbedder::new(&EmbeddingConfig::default())
            .unwrap()
            .with_api_key(None);
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::MissingApiKey(_)));
    }
}
