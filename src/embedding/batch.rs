//! Batch processing with rate limiting for embedding providers.

use governor::{
    clock::DefaultClock, middleware::NoOpMiddleware, state::NotKeyed, Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, HybridError, Result};
use crate::metrics::{get_metrics, Metrics};

use super::EmbeddingProvider;

fn is_rate_limit_error(error: &HybridError) -> bool {
    matches!(error, HybridError::Embedding(EmbeddingError::RateLimited))
}

type DefaultRateLimiter =
    RateLimiter<NotKeyed, governor::state::InMemoryState, DefaultClock, NoOpMiddleware>;

/// Configuration for batch processing.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of texts per batch
    pub batch_size: usize,
    /// Requests per second limit (0 = no limit)
    pub requests_per_second: u32,
    /// Maximum number of retries on failure
    pub max_retries: usize,
    /// Delay between retries
    pub retry_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            requests_per_second: 0,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl BatchConfig {
    /// Derive batch settings from the embedding configuration.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::default()
            .with_batch_size(config.batch_size)
            .with_rate_limit(config.requests_per_second)
            .with_max_retries(config.max_retries as usize)
    }

    /// Set the rate limit.
    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base retry delay.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Batch embedding processor with rate limiting and retry logic.
///
/// Used for ingestion, where thousands of records are embedded; query-time
/// embedding goes straight through the provider.
pub struct BatchEmbeddingProcessor {
    provider: Arc<dyn EmbeddingProvider>,
    rate_limiter: Option<Arc<DefaultRateLimiter>>,
    batch_size: usize,
    max_retries: usize,
    retry_delay: Duration,
}

impl BatchEmbeddingProcessor {
    /// Create a new batch processor with the given provider and configuration.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: BatchConfig) -> Self {
        let rate_limiter = NonZeroU32::new(config.requests_per_second)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));

        // Use the smaller of configured batch size and provider's max batch size
        let batch_size = config.batch_size.min(provider.max_batch_size()).max(1);

        Self {
            provider,
            rate_limiter,
            batch_size,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        }
    }

    /// Embed all texts, splitting into provider-sized batches.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let _timer = Metrics::start_timer(&get_metrics().embedding_duration_seconds);
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let chunk_embeddings = self.embed_with_retry(chunk).await?;
            if chunk_embeddings.len() != chunk.len() {
                return Err(EmbeddingError::Api(format!(
                    "Expected {} embeddings, got {}",
                    chunk.len(),
                    chunk_embeddings.len()
                ))
                .into());
            }
            let expected = self.provider.dimension();
            if let Some(bad) = chunk_embeddings.iter().find(|v| v.len() != expected) {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                }
                .into());
            }
            all_embeddings.extend(chunk_embeddings);
            tracing::debug!(
                embedded = all_embeddings.len(),
                total = texts.len(),
                "Embedding batch complete"
            );
        }

        get_metrics()
            .embeddings_generated_total
            .inc_by(all_embeddings.len() as u64);
        Ok(all_embeddings)
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;

        loop {
            if let Some(ref limiter) = self.rate_limiter {
                limiter.until_ready().await;
            }

            match self.provider.embed(texts).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) if attempt < self.max_retries => {
                    let delay = if is_rate_limit_error(&e) {
                        // Exponential backoff for rate limiting
                        self.retry_delay
                            .saturating_mul(2u32.saturating_pow(attempt.min(16) as u32))
                    } else {
                        self.retry_delay
                    };

                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Embedding request failed, retrying: {}",
                        e
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Get the effective batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockProvider {
        dimension: usize,
        call_count: AtomicUsize,
        max_batch: usize,
        /// Number of leading calls that fail with a rate limit
        rate_limited_calls: usize,
    }

    impl MockProvider {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                call_count: AtomicUsize::new(0),
                max_batch: 10,
                rate_limited_calls: 0,
            }
        }

        fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.call_count.fetch_add(1, Ordering::SeqCst);
            if call < self.rate_limited_calls {
                return Err(EmbeddingError::RateLimited.into());
            }
            Ok(texts.iter().map(|_| vec![0.0; self.dimension]).collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn max_batch_size(&self) -> usize {
            self.max_batch
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn fast_config() -> BatchConfig {
        BatchConfig::default().with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_batch_processing() {
        let provider = Arc::new(MockProvider::new(8));
        let processor =
            BatchEmbeddingProcessor::new(provider.clone(), fast_config().with_batch_size(5));

        // 12 texts -> batches of 5, 5, 2
        let texts: Vec<String> = (0..12).map(|i| format!("text {}", i)).collect();
        let embeddings = processor.embed_all(&texts).await.unwrap();

        assert_eq!(embeddings.len(), 12);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let provider = Arc::new(MockProvider::new(8));
        let processor = BatchEmbeddingProcessor::new(provider.clone(), fast_config());

        let embeddings = processor.embed_all(&[]).await.unwrap();
        assert!(embeddings.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_size_capped_by_provider() {
        let provider = Arc::new(MockProvider::new(8));
        let processor =
            BatchEmbeddingProcessor::new(provider.clone(), fast_config().with_batch_size(100));
        assert_eq!(processor.batch_size(), 10);
    }

    #[tokio::test]
    async fn test_retry_after_rate_limit() {
        let mut mock = MockProvider::new(8);
        mock.rate_limited_calls = 2;
        let provider = Arc::new(mock);
        let processor = BatchEmbeddingProcessor::new(provider.clone(), fast_config());

        let texts = vec!["제1조".to_string()];
        let embeddings = processor.embed_all(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let mut mock = MockProvider::new(8);
        mock.rate_limited_calls = usize::MAX;
        let provider = Arc::new(mock);
        let processor =
            BatchEmbeddingProcessor::new(provider.clone(), fast_config().with_max_retries(2));

        let result = processor.embed_all(&["제1조".to_string()]).await;
        assert!(result.is_err());
        assert_eq!(provider.call_count(), 3);
    }

    struct ShortVectors;

    #[async_trait]
    impl EmbeddingProvider for ShortVectors {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; 3]).collect())
        }

        fn dimension(&self) -> usize {
            1024
        }

        fn name(&self) -> &str {
            "short"
        }
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let processor = BatchEmbeddingProcessor::new(Arc::new(ShortVectors), fast_config());

        let err = processor
            .embed_all(&["문서내용".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HybridError::Embedding(EmbeddingError::DimensionMismatch {
                expected: 1024,
                actual: 3
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_with_many_retries() {
        let mut mock = MockProvider::new(8);
        mock.rate_limited_calls = 40;
        let provider = Arc::new(mock);
        let processor = BatchEmbeddingProcessor::new(
            provider.clone(),
            fast_config().with_max_retries(40),
        );

        let embeddings = processor.embed_all(&["제1조".to_string()]).await.unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(provider.call_count(), 41);
    }

    #[test]
    fn test_batch_config() {
        let config = BatchConfig::default()
            .with_batch_size(50)
            .with_rate_limit(10)
            .with_max_retries(5);

        assert_eq!(config.batch_size, 50);
        assert_eq!(config.requests_per_second, 10);
        assert_eq!(config.max_retries, 5);
    }
}
