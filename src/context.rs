//! Shared service handles.
//!
//! The backend, embedder, reranker and keyword extractor are built once at
//! startup and handed out as `Arc`s. Request handlers and CLI commands go
//! through [`ServiceContext`] instead of constructing their own clients.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{CachedEmbedder, QueryCache};
use crate::config::Config;
use crate::embedding::{create_provider, BatchConfig, BatchEmbeddingProcessor, EmbeddingProvider};
use crate::error::{HybridError, KeywordError, Result};
use crate::ingest::{BulkLoader, LoadReport};
use crate::metrics::{get_metrics, HealthCheck, HealthStatus};
use crate::search::{
    create_reranker, ExtractedKeywords, HybridPipeline, KeywordExtractor, LlmKeywordExtractor,
    RerankRequest, Reranker, SearchRequest, SearchResponse,
};
use crate::storage::{
    create_backend, validate_index_name, validate_mapping, vector_dimension, IndexCreated,
    IndexSchema, IndexStats, SearchBackend, SourceFields,
};

/// Process-wide service state.
pub struct ServiceContext {
    config: Config,
    backend: Arc<dyn SearchBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Arc<dyn Reranker>,
    keyword_extractor: Option<Arc<dyn KeywordExtractor>>,
    pipeline: HybridPipeline,
    loader: BulkLoader,
    query_cache: Option<QueryCache>,
}

impl ServiceContext {
    /// Build every collaborator from configuration.
    ///
    /// An unreachable backend is logged, not fatal; requests will surface it.
    pub async fn init(config: Config) -> Result<Self> {
        let backend = create_backend(&config.opensearch)?;
        let provider = create_provider(&config.embedding)?;
        let reranker = create_reranker(&config.reranker)?;

        let cache = QueryCache::new(&config.embedding.cache);

        let keyword_extractor: Option<Arc<dyn KeywordExtractor>> = if config.keywords.enabled {
            Some(Arc::new(LlmKeywordExtractor::from_config(&config.keywords)?))
        } else {
            None
        };

        match backend.health().await {
            Ok(health) => tracing::info!(
                cluster = %health.cluster_name,
                status = %health.status,
                "Search backend reachable"
            ),
            Err(e) => tracing::warn!("Search backend not reachable at startup: {}", e),
        }

        let mut context = Self::from_parts(config, backend, provider, reranker)?
            .with_query_cache(cache)?;
        context.keyword_extractor = keyword_extractor;
        Ok(context)
    }

    /// Assemble a context from already built collaborators.
    pub fn from_parts(
        config: Config,
        backend: Arc<dyn SearchBackend>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Arc<dyn Reranker>,
    ) -> Result<Self> {
        let pipeline = Self::build_pipeline(&config, &backend, &embedder, &reranker)?;

        let batch = BatchEmbeddingProcessor::new(
            embedder.clone(),
            BatchConfig::from_config(&config.embedding),
        );
        let loader = BulkLoader::new(
            backend.clone(),
            Arc::new(batch),
            config.ingest.clone(),
            config.search.vector_field.clone(),
        );

        Ok(Self {
            config,
            backend,
            embedder,
            reranker,
            keyword_extractor: None,
            pipeline,
            loader,
            query_cache: None,
        })
    }

    /// Route query embeddings through `cache`. Ingestion keeps the raw embedder.
    pub fn with_query_cache(mut self, cache: QueryCache) -> Result<Self> {
        let cached: Arc<dyn EmbeddingProvider> =
            Arc::new(CachedEmbedder::new(self.embedder.clone(), cache.clone()));
        self.pipeline = Self::build_pipeline(&self.config, &self.backend, &cached, &self.reranker)?;
        self.query_cache = Some(cache);
        Ok(self)
    }

    fn build_pipeline(
        config: &Config,
        backend: &Arc<dyn SearchBackend>,
        embedder: &Arc<dyn EmbeddingProvider>,
        reranker: &Arc<dyn Reranker>,
    ) -> Result<HybridPipeline> {
        HybridPipeline::builder()
            .backend(backend.clone())
            .embedder(embedder.clone())
            .reranker(reranker.clone())
            .search_config(config.search.clone())
            .reranker_config(config.reranker.clone())
            .default_index(config.opensearch.default_index.clone())
            .build()
    }

    pub fn with_keyword_extractor(mut self, extractor: Arc<dyn KeywordExtractor>) -> Self {
        self.keyword_extractor = Some(extractor);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    pub fn pipeline(&self) -> &HybridPipeline {
        &self.pipeline
    }

    pub fn loader(&self) -> &BulkLoader {
        &self.loader
    }

    fn index_or_default<'a>(&'a self, index: Option<&'a str>) -> &'a str {
        index
            .filter(|i| !i.trim().is_empty())
            .unwrap_or(&self.config.opensearch.default_index)
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        self.pipeline.search(request).await
    }

    pub async fn rerank(&self, request: RerankRequest) -> Result<SearchResponse> {
        self.pipeline.rerank_documents(request).await
    }

    /// Recommended mapping for the configured embedder.
    pub fn example_mapping(&self) -> Value {
        IndexSchema::new(self.embedder.dimension())
            .with_vector_field(self.config.search.vector_field.clone())
            .to_mapping()
    }

    /// Create an index, using the recommended mapping when none is given.
    ///
    /// A declared vector dimension must match the embedder.
    pub async fn create_index(&self, name: &str, mapping: Option<Value>) -> Result<IndexCreated> {
        validate_index_name(name)?;
        let mapping = mapping.unwrap_or_else(|| self.example_mapping());
        validate_mapping(&mapping)?;

        let vector_field = &self.config.search.vector_field;
        if let Some(declared) = vector_dimension(&mapping, vector_field) {
            let expected = self.embedder.dimension();
            if declared != expected {
                return Err(HybridError::invalid_query(format!(
                    "mapping declares {} dimensions for '{}' but the embedder produces {}",
                    declared, vector_field, expected
                )));
            }
        }

        let created = self.backend.create_index(name, &mapping).await?;
        if created.already_exists {
            tracing::info!(index = %name, "Index already exists");
        } else {
            tracing::info!(index = %name, "Created index");
        }
        Ok(created)
    }

    pub async fn delete_index(&self, name: &str) -> Result<()> {
        validate_index_name(name)?;
        self.backend.delete_index(name).await?;
        tracing::info!(index = %name, "Deleted index");
        Ok(())
    }

    pub async fn index_stats(&self, name: &str) -> Result<IndexStats> {
        validate_index_name(name)?;
        self.backend.index_stats(name).await
    }

    pub async fn load_documents(
        &self,
        index: Option<&str>,
        source_pattern: Option<&str>,
    ) -> Result<LoadReport> {
        let index = self.index_or_default(index);
        validate_index_name(index)?;
        self.loader.load(index, source_pattern).await
    }

    pub async fn index_document(
        &self,
        index: &str,
        document: SourceFields,
        id: Option<String>,
    ) -> Result<String> {
        validate_index_name(index)?;
        self.loader.index_one(index, document, id).await
    }

    pub async fn extract_keywords(&self, user_input: &str) -> Result<ExtractedKeywords> {
        if user_input.trim().is_empty() {
            return Err(HybridError::invalid_query("user_input must not be empty"));
        }
        let extractor = self
            .keyword_extractor
            .as_ref()
            .ok_or(KeywordError::NotConfigured)?;
        extractor.extract(user_input).await
    }

    /// Probe the backend and summarize service health.
    pub async fn health(&self) -> HealthStatus {
        let started = Instant::now();
        let backend_check = match self.backend.health().await {
            Ok(health) if health.status == "red" => HealthCheck::degraded(
                self.backend.name(),
                format!("cluster {} is red", health.cluster_name),
            ),
            Ok(_) => HealthCheck::healthy_with_duration(
                self.backend.name(),
                started.elapsed().as_millis() as u64,
            ),
            Err(e) => HealthCheck::unhealthy(self.backend.name(), e.to_string()),
        };

        let checks = vec![backend_check];
        let metrics = get_metrics();
        metrics.update_uptime();

        HealthStatus {
            status: HealthStatus::aggregate(&checks),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: metrics.uptime().as_secs(),
            embedding_dimension: self.embedder.dimension(),
            embedding_model: self.embedder.name().to_string(),
            reranker: self.reranker.name().to_string(),
            checks,
        }
    }

    /// Log final counters and drop cached state.
    pub fn shutdown(&self) {
        if let Some(cache) = &self.query_cache {
            tracing::debug!(entries = cache.stats().embedding_entries, "Clearing query cache");
            cache.invalidate_all();
        }
        let snapshot = get_metrics().snapshot();
        tracing::info!(
            searches = snapshot.search_queries_total,
            search_errors = snapshot.search_errors_total,
            rerank_fallbacks = snapshot.rerank_fallbacks_total,
            documents_indexed = snapshot.documents_indexed_total,
            "Service shutting down"
        );
    }
}
