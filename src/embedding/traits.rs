//! Embedding trait definitions.

use async_trait::async_trait;

use crate::error::{EmbeddingError, Result};

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text and check the output dimension.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Api("No embedding returned".to_string()))?;

        if embedding.len() != self.dimension() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension(),
                actual: embedding.len(),
            }
            .into());
        }
        Ok(embedding)
    }

    /// Return the embedding dimension.
    fn dimension(&self) -> usize;

    /// Return the maximum batch size.
    fn max_batch_size(&self) -> usize {
        100
    }

    /// Model identifier used for logging and cache keys.
    fn name(&self) -> &str;
}
