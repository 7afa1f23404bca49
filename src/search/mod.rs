//! Hybrid search: lexical BM25 plus k-NN retrieval, fused and reranked.
//!
//! # Architecture
//!
//! ```text
//!   keywords              query_text
//!      │                      │
//!      ▼                      ▼
//! BM25 query             Embedding
//!      │                      │
//!      │                      ▼
//!      │                 k-NN query
//!      │                      │
//!      └──────────┬───────────┘
//!                 ▼
//!     Min-max normalization per stream
//!                 │
//!                 ▼
//!       Weighted sum, top_k
//!                 │
//!                 ├── use_rerank = false ──┐
//!                 ▼                        │
//!        Cross-encoder rerank              │
//!                 │                        │
//!                 └──────────┬─────────────┘
//!                            ▼
//!                   top rerank_top_k
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let pipeline = HybridPipeline::builder()
//!     .backend(backend)
//!     .embedder(embedder)
//!     .reranker(reranker)
//!     .build()?;
//!
//! let response = pipeline
//!     .search(SearchRequest::new("의약품 제조 규정").keywords(["규정", "준수"]))
//!     .await?;
//! ```

#[cfg(feature = "local-models")]
mod cross_encoder;
mod fusion;
mod keywords;
mod pipeline;
mod query;
mod reranker;
mod retry;

#[cfg(feature = "local-models")]
pub use cross_encoder::LocalCrossEncoder;
pub use fusion::{fuse, normalize_min_max, FusedCandidate};
pub use keywords::{parse_keywords, ExtractedKeywords, KeywordExtractor, LlmKeywordExtractor};
pub use pipeline::{
    Built, Diagnostics, Fused, HybridPipeline, HybridPipelineBuilder, Ranked, RerankStatus,
    Retrieved, SearchResponse, SearchResult, Stage, StageWarning,
};
pub use query::{
    parse_field_boost, LexicalRequest, Query, QueryBuilder, RerankDocument, RerankRequest,
    SearchRequest, VectorRequest,
    DEFAULT_BM25_WEIGHT, DEFAULT_RERANK_TOP_K, DEFAULT_TOP_K, DEFAULT_USE_RERANK,
    DEFAULT_VECTOR_WEIGHT, MAX_RERANK_TOP_K, MAX_TOP_K,
};
pub use reranker::{
    candidate_text, create_reranker, CrossEncoderReranker, RerankFailure, RerankOutcome,
    RerankStage, RerankedResult, Reranker,
};
