//! API-based embedding provider (OpenAI-compatible).
//!
//! Works against OpenAI itself as well as self-hosted servers exposing the
//! same `/embeddings` route (text-embeddings-inference, vLLM, Ollama).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};

use super::EmbeddingProvider;

/// OpenAI-compatible API embedding provider.
pub struct ApiEmbeddingProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    max_batch_size: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding_format: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl ApiEmbeddingProvider {
    /// Create a new API embedding provider from configuration.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Api(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            model: config.api.model.clone(),
            api_key: config.api.api_key.clone(),
            dimension: config.dimension,
            max_batch_size: config.batch_size.max(1),
        })
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: Some("float"),
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Api("Request timed out".to_string())
            } else if e.is_connect() {
                EmbeddingError::Api(format!("Connection failed: {}", e))
            } else {
                EmbeddingError::Api(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();

        if status.is_success() {
            let result: EmbeddingResponse = response
                .json()
                .await
                .map_err(|e| EmbeddingError::Api(format!("Failed to parse response: {}", e)))?;

            let mut data = result.data;
            data.sort_by_key(|d| d.index);

            if data.len() != texts.len() {
                return Err(EmbeddingError::Api(format!(
                    "Expected {} embeddings, got {}",
                    texts.len(),
                    data.len()
                ))
                .into());
            }

            Ok(data.into_iter().map(|d| d.embedding).collect())
        } else if status.as_u16() == 429 {
            Err(EmbeddingError::RateLimited.into())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&error_text) {
                Err(EmbeddingError::Api(format!(
                    "API error ({}): {}",
                    status, error_response.error.message
                ))
                .into())
            } else {
                Err(EmbeddingError::Api(format!("API error ({}): {}", status, error_text)).into())
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for ApiEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        if texts.len() > self.max_batch_size {
            return Err(EmbeddingError::BatchTooLarge(texts.len(), self.max_batch_size).into());
        }

        self.request_embeddings(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn name(&self) -> &str {
        &self.model
    }
}
