//! Integration tests for the hybrid retrieval service.
//!
//! These run against the in-memory backend with deterministic embedder and
//! reranker stand-ins, so no cluster or model download is needed.
//!
//! ```bash
//! cargo test --test integration
//! ```

#[path = "integration/common.rs"]
mod common;

#[path = "integration/test_api.rs"]
mod test_api;

#[path = "integration/test_ingest.rs"]
mod test_ingest;

#[path = "integration/test_pipeline.rs"]
mod test_pipeline;
