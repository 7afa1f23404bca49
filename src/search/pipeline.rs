//! Hybrid retrieval pipeline.
//!
//! A request moves through `Built → Retrieved → Fused → (Reranked | Skipped) → Done`.
//! Each state is its own type and every transition consumes the previous
//! state, so no stage can run twice or out of order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::{RerankerConfig, SearchConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{BackendError, EmbeddingError, ErrorKind, HybridError, Result, SearchError};
use crate::metrics::{get_metrics, Metrics};
use crate::storage::{RetrievalHit, SearchBackend, SourceFields};

use super::fusion::{fuse, FusedCandidate};
use super::query::{Query, QueryBuilder, RerankRequest, SearchRequest};
use super::reranker::{RerankStage, Reranker};
use super::retry::with_timeout_retry;

/// Pipeline stages, in the order they can be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Built,
    Retrieved,
    Fused,
    Reranked,
    Skipped,
    Done,
}

/// How the final ordering was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankStatus {
    /// Cross-encoder order.
    Applied,
    /// Reranking was not requested; fused order.
    Skipped,
    /// Every rerank call failed; fused order.
    Fallback,
}

/// A degraded condition that did not fail the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageWarning {
    pub kind: ErrorKind,
    pub message: String,
}

/// Per-stage counts for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub stages: Vec<Stage>,
    pub lexical_hits: usize,
    pub vector_hits: usize,
    pub fused_candidates: usize,
    pub reranked: usize,
    pub rerank_failures: usize,
    pub rerank: RerankStatus,
    pub warnings: Vec<StageWarning>,
    pub took_ms: u64,
}

impl Diagnostics {
    fn new() -> Self {
        Self {
            stages: vec![Stage::Built],
            lexical_hits: 0,
            vector_hits: 0,
            fused_candidates: 0,
            reranked: 0,
            rerank_failures: 0,
            rerank: RerankStatus::Skipped,
            warnings: Vec::new(),
            took_ms: 0,
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    fn warn(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.warnings.push(StageWarning {
            kind,
            message: message.into(),
        });
    }
}

/// One ranked document in the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document_id: String,
    pub fused_score: f32,
    /// `None` unless the cross-encoder scored this document.
    pub rerank_score: Option<f32>,
    pub bm25_score_norm: Option<f32>,
    pub vector_score_norm: Option<f32>,
    pub source_fields: SourceFields,
}

impl From<FusedCandidate> for SearchResult {
    fn from(candidate: FusedCandidate) -> Self {
        Self {
            document_id: candidate.document_id,
            fused_score: candidate.fused_score,
            rerank_score: None,
            bm25_score_norm: candidate.bm25_score_norm,
            vector_score_norm: candidate.vector_score_norm,
            source_fields: candidate.source_fields,
        }
    }
}

/// Ordered results plus diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub diagnostics: Diagnostics,
}

/// A validated query, nothing retrieved yet.
pub struct Built {
    query: Query,
    diagnostics: Diagnostics,
    started: Instant,
}

/// Both retrieval streams collected.
pub struct Retrieved {
    query: Query,
    lexical: Vec<RetrievalHit>,
    vector: Vec<RetrievalHit>,
    diagnostics: Diagnostics,
    started: Instant,
}

/// Streams normalized and merged into at most `top_k` candidates.
pub struct Fused {
    query: Query,
    candidates: Vec<FusedCandidate>,
    diagnostics: Diagnostics,
    started: Instant,
}

/// Final ordering decided, either reranked or skipped.
pub struct Ranked {
    results: Vec<SearchResult>,
    diagnostics: Diagnostics,
    started: Instant,
}

impl Built {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            diagnostics: Diagnostics::new(),
            started: Instant::now(),
        }
    }

    /// Run lexical and vector retrieval concurrently.
    ///
    /// Any retrieval failure fails the request. Two empty streams are a
    /// legitimate "no matches" outcome.
    pub async fn retrieve(self, pipeline: &HybridPipeline) -> Result<Retrieved> {
        let metrics = get_metrics();
        let _timer = Metrics::start_timer(&metrics.retrieval_duration_seconds);

        let lexical_request = pipeline.builder.lexical_request(&self.query);
        let timeout_ms = pipeline.retrieval_timeout.as_millis() as u64;

        let lexical = async {
            tokio::time::timeout(
                pipeline.retrieval_timeout,
                pipeline.backend.lexical_search(&lexical_request),
            )
            .await
            .map_err(|_| HybridError::from(BackendError::Timeout(timeout_ms)))?
        };

        let vector = async {
            let embedding = pipeline.embed_query(&self.query.query_text).await?;
            let vector_request = pipeline.builder.vector_request(&self.query, embedding);
            tokio::time::timeout(
                pipeline.retrieval_timeout,
                pipeline.backend.vector_search(&vector_request),
            )
            .await
            .map_err(|_| HybridError::from(BackendError::Timeout(timeout_ms)))?
        };

        let (lexical, vector) = tokio::try_join!(lexical, vector)?;

        let mut diagnostics = self.diagnostics;
        diagnostics.lexical_hits = lexical.len();
        diagnostics.vector_hits = vector.len();
        diagnostics.enter(Stage::Retrieved);

        tracing::debug!(
            index = %self.query.index,
            lexical_hits = lexical.len(),
            vector_hits = vector.len(),
            "Retrieved candidates"
        );

        Ok(Retrieved {
            query: self.query,
            lexical,
            vector,
            diagnostics,
            started: self.started,
        })
    }
}

impl Retrieved {
    pub fn fuse(self) -> Fused {
        let candidates = fuse(
            self.lexical,
            self.vector,
            self.query.bm25_weight,
            self.query.vector_weight,
            self.query.top_k,
        );

        let mut diagnostics = self.diagnostics;
        diagnostics.fused_candidates = candidates.len();
        diagnostics.enter(Stage::Fused);

        tracing::debug!(fused = candidates.len(), "Fused candidates");

        Fused {
            query: self.query,
            candidates,
            diagnostics,
            started: self.started,
        }
    }
}

impl Fused {
    /// Caller-supplied candidates, kept in the order given.
    pub fn supplied(query: Query, candidates: Vec<FusedCandidate>) -> Self {
        let mut diagnostics = Diagnostics::new();
        diagnostics.fused_candidates = candidates.len();
        diagnostics.enter(Stage::Fused);

        Self {
            query,
            candidates,
            diagnostics,
            started: Instant::now(),
        }
    }

    pub fn wants_rerank(&self) -> bool {
        self.query.use_rerank
    }

    /// Reorder candidates with the cross-encoder.
    ///
    /// When every call fails the fused order is kept and the outage is
    /// recorded as a warning.
    pub async fn rerank(self, stage: &RerankStage) -> Ranked {
        let metrics = get_metrics();
        let _timer = Metrics::start_timer(&metrics.reranking_duration_seconds);

        let mut diagnostics = self.diagnostics;
        diagnostics.enter(Stage::Reranked);
        let rerank_top_k = self.query.rerank_top_k;
        let total = self.candidates.len();

        let results = match stage
            .rerank(&self.query.query_text, self.candidates.clone(), rerank_top_k)
            .await
        {
            Ok(outcome) => {
                metrics
                    .rerank_failures_total
                    .inc_by(outcome.failures.len() as u64);
                diagnostics.rerank = RerankStatus::Applied;
                diagnostics.rerank_failures = outcome.failures.len();
                for failure in outcome.failures {
                    diagnostics.warn(
                        ErrorKind::PartialRerankFailure,
                        format!("{}: {}", failure.document_id, failure.message),
                    );
                }
                outcome
                    .results
                    .into_iter()
                    .map(|r| SearchResult {
                        document_id: r.document_id,
                        fused_score: r.fused_score,
                        rerank_score: Some(r.rerank_score),
                        bm25_score_norm: r.bm25_score_norm,
                        vector_score_norm: r.vector_score_norm,
                        source_fields: r.source_fields,
                    })
                    .collect::<Vec<_>>()
            }
            Err(e) => {
                tracing::warn!(
                    reranker = stage.reranker_name(),
                    "Reranking unavailable, returning fused order: {}",
                    e
                );
                metrics.rerank_fallbacks_total.inc();
                metrics.rerank_failures_total.inc_by(total as u64);
                diagnostics.rerank = RerankStatus::Fallback;
                diagnostics.rerank_failures = total;
                diagnostics.warn(ErrorKind::RerankingUnavailable, e.to_string());
                top_fused(self.candidates, rerank_top_k)
            }
        };

        diagnostics.reranked = results.len();
        Ranked {
            results,
            diagnostics,
            started: self.started,
        }
    }

    /// Keep the fused order without calling the cross-encoder.
    pub fn skip(self) -> Ranked {
        let mut diagnostics = self.diagnostics;
        diagnostics.enter(Stage::Skipped);
        diagnostics.rerank = RerankStatus::Skipped;

        Ranked {
            results: top_fused(self.candidates, self.query.rerank_top_k),
            diagnostics,
            started: self.started,
        }
    }
}

fn top_fused(candidates: Vec<FusedCandidate>, rerank_top_k: usize) -> Vec<SearchResult> {
    candidates
        .into_iter()
        .take(rerank_top_k)
        .map(SearchResult::from)
        .collect()
}

impl Ranked {
    pub fn finish(self) -> SearchResponse {
        let mut diagnostics = self.diagnostics;
        diagnostics.enter(Stage::Done);
        diagnostics.took_ms = self.started.elapsed().as_millis() as u64;

        SearchResponse {
            results: self.results,
            diagnostics,
        }
    }
}

/// Hybrid BM25 + k-NN search with optional cross-encoder reranking.
///
/// Backend, embedder and reranker handles are shared and never rebuilt per
/// request.
pub struct HybridPipeline {
    backend: Arc<dyn SearchBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    rerank: RerankStage,
    builder: QueryBuilder,
    default_index: String,
    retrieval_timeout: Duration,
    embedding_timeout: Duration,
    embedding_retries: u32,
}

impl HybridPipeline {
    pub fn builder() -> HybridPipelineBuilder {
        HybridPipelineBuilder::new()
    }

    pub fn default_index(&self) -> &str {
        &self.default_index
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        with_timeout_retry(
            "query embedding",
            self.embedding_timeout,
            self.embedding_retries,
            |ms| EmbeddingError::Timeout(ms).into(),
            || self.embedder.embed_one(text),
        )
        .await
    }

    /// Execute a search request.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let metrics = get_metrics();
        metrics.search_queries_total.inc();
        let _timer = Metrics::start_timer(&metrics.search_duration_seconds);

        let result = self.run(request).await;
        if let Err(e) = &result {
            metrics.search_errors_total.inc();
            tracing::warn!(kind = %e.kind(), "Search failed: {}", e);
        }
        result
    }

    /// Rerank documents supplied by the caller, without retrieval.
    ///
    /// An unavailable reranker yields the documents in the order given, with
    /// a `RerankingUnavailable` warning.
    pub async fn rerank_documents(&self, request: RerankRequest) -> Result<SearchResponse> {
        let (query, candidates) = request.validate(&self.default_index)?;
        let response = Fused::supplied(query, candidates)
            .rerank(&self.rerank)
            .await
            .finish();

        tracing::info!(
            documents = response.diagnostics.fused_candidates,
            reranked = response.diagnostics.reranked,
            rerank = ?response.diagnostics.rerank,
            took_ms = response.diagnostics.took_ms,
            "Rerank completed"
        );
        Ok(response)
    }

    async fn run(&self, request: SearchRequest) -> Result<SearchResponse> {
        let query = request.validate(&self.default_index)?;
        let index = query.index.clone();

        let fused = Built::new(query).retrieve(self).await?.fuse();
        let ranked = if fused.wants_rerank() {
            fused.rerank(&self.rerank).await
        } else {
            fused.skip()
        };
        let response = ranked.finish();

        let d = &response.diagnostics;
        tracing::info!(
            index = %index,
            lexical_hits = d.lexical_hits,
            vector_hits = d.vector_hits,
            fused = d.fused_candidates,
            reranked = d.reranked,
            rerank_failures = d.rerank_failures,
            took_ms = d.took_ms,
            "Search completed"
        );

        Ok(response)
    }
}

/// Builder for [`HybridPipeline`].
pub struct HybridPipelineBuilder {
    backend: Option<Arc<dyn SearchBackend>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    reranker: Option<Arc<dyn Reranker>>,
    search: SearchConfig,
    reranker_config: RerankerConfig,
    default_index: String,
}

impl Default for HybridPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridPipelineBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            embedder: None,
            reranker: None,
            search: SearchConfig::default(),
            reranker_config: RerankerConfig::default(),
            default_index: "internal_regulations_index".to_string(),
        }
    }

    pub fn backend(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn search_config(mut self, config: SearchConfig) -> Self {
        self.search = config;
        self
    }

    pub fn reranker_config(mut self, config: RerankerConfig) -> Self {
        self.reranker_config = config;
        self
    }

    pub fn default_index(mut self, index: impl Into<String>) -> Self {
        self.default_index = index.into();
        self
    }

    pub fn build(self) -> Result<HybridPipeline> {
        let backend = self
            .backend
            .ok_or_else(|| SearchError::InvalidQuery("Search backend required".to_string()))?;
        let embedder = self
            .embedder
            .ok_or_else(|| SearchError::InvalidQuery("Embedding provider required".to_string()))?;
        let reranker = self
            .reranker
            .ok_or_else(|| SearchError::InvalidQuery("Reranker required".to_string()))?;

        Ok(HybridPipeline {
            backend,
            embedder,
            rerank: RerankStage::from_config(
                reranker,
                self.search.rerank_fields.clone(),
                &self.reranker_config,
            ),
            builder: QueryBuilder::from_config(&self.search),
            default_index: self.default_index,
            retrieval_timeout: Duration::from_millis(self.search.retrieval_timeout_ms),
            embedding_timeout: Duration::from_millis(self.search.embedding_timeout_ms),
            embedding_retries: self.search.embedding_retries,
        })
    }
}
