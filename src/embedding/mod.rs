//! Embedding module for dense query and document vectors.
//!
//! # Providers
//!
//! - [`ApiEmbeddingProvider`]: OpenAI-compatible `/embeddings` endpoint. This is
//!   how the Korean snowflake-arctic model is usually served (TEI, vLLM).
//!
//! - `LocalEmbeddingProvider`: fastembed-rs ONNX models, behind the
//!   `local-models` feature.
//!
//! # Batch Processing
//!
//! [`BatchEmbeddingProcessor`] wraps a shared provider for bulk ingestion:
//! - Automatic batching of large inputs
//! - Rate limiting via `governor`
//! - Retry logic with exponential backoff

mod api;
mod batch;
#[cfg(feature = "local-models")]
mod local;
mod traits;

pub use api::ApiEmbeddingProvider;
pub use batch::{BatchConfig, BatchEmbeddingProcessor};
#[cfg(feature = "local-models")]
pub use local::LocalEmbeddingProvider;
pub use traits::EmbeddingProvider;

use std::sync::Arc;

use crate::config::{EmbeddingConfig, EmbeddingProviderType};
use crate::error::Result;

/// Create an embedding provider from configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider {
        EmbeddingProviderType::Api => Ok(Arc::new(ApiEmbeddingProvider::from_config(config)?)),
        #[cfg(feature = "local-models")]
        EmbeddingProviderType::Local => {
            Ok(Arc::new(LocalEmbeddingProvider::from_config(config)?))
        }
        #[cfg(not(feature = "local-models"))]
        EmbeddingProviderType::Local => Err(crate::error::ConfigError::Invalid(
            "embedding.provider = \"local\" requires the `local-models` feature".to_string(),
        )
        .into()),
    }
}
