//! Hybrid Retrieval: BM25 + k-NN search over OpenSearch
//!
//! Retrieves candidates from a lexical (BM25) stream and a vector (k-NN)
//! stream in parallel, fuses them with per-stream min-max normalization,
//! and optionally reorders the top candidates with a cross-encoder.

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod search;
pub mod storage;
pub mod utils;

pub use api::{create_rest_router, serve, ApiState, RestApiConfig};
pub use cache::{CacheStats, CachedEmbedder, QueryCache};
pub use config::Config;
pub use context::ServiceContext;
pub use error::{ErrorKind, HybridError, Result};
pub use ingest::{BulkLoader, LoadError, LoadReport};
pub use metrics::{get_metrics, HealthCheck, HealthState, HealthStatus, Metrics, MetricsSnapshot};
pub use search::{
    Diagnostics, FusedCandidate, HybridPipeline, HybridPipelineBuilder, RerankRequest,
    RerankStatus, Reranker, SearchRequest, SearchResponse, SearchResult, Stage,
};
pub use storage::{MemoryBackend, OpenSearchBackend, SearchBackend};
