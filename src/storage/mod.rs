//! Search backends.
//!
//! - `OpenSearchBackend`: OpenSearch cluster over its REST API
//! - `MemoryBackend`: in-process index for tests and offline use

mod memory;
mod opensearch_backend;
mod schema;
mod traits;

pub use memory::MemoryBackend;
pub use opensearch_backend::OpenSearchBackend;
pub use schema::{validate_index_name, validate_mapping, vector_dimension, IndexSchema};
pub use traits::*;

use crate::config::{BackendType, OpenSearchConfig};
use crate::error::Result;
use std::sync::Arc;

/// Create a search backend from configuration.
pub fn create_backend(config: &OpenSearchConfig) -> Result<Arc<dyn SearchBackend>> {
    match config.backend {
        BackendType::OpenSearch => {
            let backend = OpenSearchBackend::from_config(config)?;
            tracing::info!("Using OpenSearch backend at {}", config.url);
            Ok(Arc::new(backend))
        }
        BackendType::Memory => {
            tracing::info!("Using in-memory search backend");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}
