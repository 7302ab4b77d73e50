//! Embedding providers.
//!
//! The index never computes embeddings itself; it hands entity summaries to
//! an [`EmbeddingProvider`] and stores the vectors through
//! [`crate::vector_store::VectorStore`].

pub mod sync;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use sync::{EmbeddingSync, SyncStats};

/// Default OpenRouter endpoint.
pub const DEFAULT_EMBEDDINGS_URL: &str = "https://openrouter.ai/api/v1/embeddings";

/// Default embedding model.
pub const DEFAULT_MODEL: &str = "qwen/qwen3-embedding-8b";

const MAX_RETRIES: u32 = 3;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("API request failed ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited after {0} retries")]
    RateLimited(u32),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".to_string()).into())
    }

    /// One vector per input text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    fn max_batch_size(&self) -> usize {
        32
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// OpenAI-compatible embeddings endpoint, OpenRouter by default.
pub struct OpenRouterEmbeddings {
    api_key: String,
    model: String,
    dimensions: usize,
    client: Client,
    base_url: String,
}

impl OpenRouterEmbeddings {
    pub fn new(api_key: String, model: Option<String>, dimensions: Option<usize>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            dimensions: dimensions.unwrap_or(crate::DEFAULT_DIMENSIONS),
            client: Client::new(),
            base_url: DEFAULT_EMBEDDINGS_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// POST one batch, backing off on 429.
    async fn send_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut attempt = 0;
        let mut backoff_secs = 1u64;

        loop {
            debug!(texts = texts.len(), url = %self.base_url, "Sending embedding request");
            let response = self
                .client
                .post(&self.base_url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;
            let status = response.status();

            if status.is_success() {
                let parsed: EmbeddingResponse = response
                    .json()
                    .await
                    .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
                return self.ordered(parsed, texts.len());
            }

            if status.as_u16() == 429 {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    return Err(EmbeddingError::RateLimited(MAX_RETRIES));
                }
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);
                warn!(retry_after, attempt, max = MAX_RETRIES, "Embedding API rate limited");
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                backoff_secs *= 2;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                body,
            });
        }
    }

    /// Reorder by `index` and check count and width.
    fn ordered(&self, response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut data = response.data;
        if data.len() != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                expected,
                data.len()
            )));
        }
        data.sort_by_key(|d| d.index);
        if let Some(bad) = data.iter().find(|d| d.embedding.len() != self.dimensions) {
            return Err(EmbeddingError::InvalidResponse(format!(
                "embedding has {} dimensions, expected {}",
                bad.embedding.len(),
                self.dimensions
            )));
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenRouterEmbeddings {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        Ok(self.send_request(texts).await?)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        let provider = OpenRouterEmbeddings::new("test-key".to_string(), None, None);
        assert_eq!(provider.dimensions(), crate::DEFAULT_DIMENSIONS);
        assert_eq!(provider.model_name(), DEFAULT_MODEL);
        assert_eq!(provider.max_batch_size(), 32);
        assert_eq!(provider.base_url, DEFAULT_EMBEDDINGS_URL);
    }

    #[test]
    fn test_provider_custom_model() {
        let provider = OpenRouterEmbeddings::new("k".to_string(), Some("custom/model".to_string()), Some(3))
            .with_base_url("http://localhost:8080/embeddings".to_string());
        assert_eq!(provider.dimensions(), 3);
        assert_eq!(provider.model_name(), "custom/model");
        assert_eq!(provider.base_url, "http://localhost:8080/embeddings");
    }

    #[test]
    fn test_response_is_reordered_and_checked() {
        let provider = OpenRouterEmbeddings::new("k".to_string(), None, Some(2));
        let response = EmbeddingResponse {
            data: vec![
                EmbeddingData { embedding: vec![0.0, 1.0], index: 1 },
                EmbeddingData { embedding: vec![1.0, 0.0], index: 0 },
            ],
        };
        let vectors = provider.ordered(response, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);

        let short = EmbeddingResponse {
            data: vec![EmbeddingData { embedding: vec![1.0], index: 0 }],
        };
        assert!(matches!(provider.ordered(short, 1), Err(EmbeddingError::InvalidResponse(_))));
    }
}
