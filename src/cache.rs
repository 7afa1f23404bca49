//! Query embedding cache.
//!
//! Repeated searches with the same `query_text` reuse the cached vector
//! instead of calling the embedder again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, Result};
use crate::metrics::get_metrics;

/// Hash key for embedding cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmbeddingKey {
    text: String,
    model: String,
}

impl EmbeddingKey {
    /// Create a new embedding key.
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
        }
    }
}

/// Cache for query embeddings.
#[derive(Clone)]
pub struct QueryCache {
    embedding_cache: Cache<EmbeddingKey, Arc<Vec<f32>>>,
    enabled: bool,
}

impl QueryCache {
    /// Create a new query cache from configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let embedding_cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();

        Self {
            embedding_cache,
            enabled: config.enabled,
        }
    }

    /// Create a disabled cache.
    pub fn disabled() -> Self {
        Self {
            embedding_cache: Cache::builder().max_capacity(0).build(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get a cached embedding.
    pub async fn get_embedding(&self, key: &EmbeddingKey) -> Option<Arc<Vec<f32>>> {
        if !self.enabled {
            return None;
        }

        let result = self.embedding_cache.get(key).await;
        let metrics = get_metrics();

        if result.is_some() {
            metrics.cache_hits_total.inc();
        } else {
            metrics.cache_misses_total.inc();
        }

        result
    }

    /// Store an embedding in the cache.
    pub async fn set_embedding(&self, key: EmbeddingKey, embedding: Vec<f32>) {
        if !self.enabled {
            return;
        }

        self.embedding_cache.insert(key, Arc::new(embedding)).await;
    }

    /// Invalidate all cache entries.
    pub fn invalidate_all(&self) {
        self.embedding_cache.invalidate_all();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            embedding_entries: self.embedding_cache.entry_count(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub embedding_entries: u64,
}

/// Embedding provider decorator that consults the [`QueryCache`] first.
pub struct CachedEmbedder {
    embedder: Arc<dyn EmbeddingProvider>,
    cache: QueryCache,
}

impl CachedEmbedder {
    /// Create a new cached embedder.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, cache: QueryCache) -> Self {
        Self { embedder, cache }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.cache.is_enabled() {
            return self.embedder.embed(texts).await;
        }

        let model = self.embedder.name().to_string();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut to_embed: Vec<(usize, String)> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = EmbeddingKey::new(text.clone(), model.clone());
            if let Some(cached) = self.cache.get_embedding(&key).await {
                results[i] = Some((*cached).clone());
            } else {
                to_embed.push((i, text.clone()));
            }
        }

        if !to_embed.is_empty() {
            let texts_to_embed: Vec<String> = to_embed.iter().map(|(_, t)| t.clone()).collect();
            let embeddings = self.embedder.embed(&texts_to_embed).await?;
            if embeddings.len() != texts_to_embed.len() {
                return Err(EmbeddingError::Api(format!(
                    "Expected {} embeddings, got {}",
                    texts_to_embed.len(),
                    embeddings.len()
                ))
                .into());
            }

            for ((idx, text), embedding) in to_embed.into_iter().zip(embeddings) {
                let key = EmbeddingKey::new(text, model.clone());
                self.cache.set_embedding(key, embedding.clone()).await;
                results[idx] = Some(embedding);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    fn max_batch_size(&self) -> usize {
        self.embedder.max_batch_size()
    }

    fn name(&self) -> &str {
        self.embedder.name()
    }
}
