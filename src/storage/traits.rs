//! Search backend trait definitions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::search::{LexicalRequest, VectorRequest};

/// Stored document fields as returned in `_source`.
pub type SourceFields = serde_json::Map<String, serde_json::Value>;

/// A single hit from one retrieval stream.
///
/// Raw scores from the lexical and vector streams are on different scales
/// and must not be compared before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub document_id: String,
    pub raw_score: f32,
    pub source_fields: SourceFields,
}

impl RetrievalHit {
    pub fn new(document_id: impl Into<String>, raw_score: f32) -> Self {
        Self {
            document_id: document_id.into(),
            raw_score,
            source_fields: SourceFields::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.source_fields.insert(name.to_string(), value.into());
        self
    }
}

/// A document to be written to an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Explicit document id; the backend assigns one when absent.
    pub id: Option<String>,
    pub source: SourceFields,
}

/// Outcome of an index creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexCreated {
    pub index_name: String,
    pub acknowledged: bool,
    /// The index existed before the request; nothing was changed.
    pub already_exists: bool,
}

/// Shard accounting reported with index statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

/// Index statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub index_name: String,
    pub doc_count: u64,
    pub size_bytes: u64,
    pub shard_info: ShardInfo,
}

/// A document the backend refused during a bulk request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemError {
    /// Position of the document within the submitted batch.
    pub position: usize,
    pub document_id: Option<String>,
    pub reason: String,
}

/// Outcome of a bulk indexing request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkReport {
    pub indexed_count: usize,
    pub errors: Vec<BulkItemError>,
}

impl BulkReport {
    /// Fold another report into this one, shifting error positions by `offset`.
    pub fn merge(&mut self, other: BulkReport, offset: usize) {
        self.indexed_count += other.indexed_count;
        self.errors
            .extend(other.errors.into_iter().map(|mut e| {
                e.position += offset;
                e
            }));
    }
}

/// Cluster reachability summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub cluster_name: String,
    /// green, yellow or red
    pub status: String,
    pub number_of_nodes: u64,
}

/// Trait for search backends.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Execute a keyword query (OR across keywords) and return hits by descending score.
    async fn lexical_search(&self, request: &LexicalRequest) -> Result<Vec<RetrievalHit>>;

    /// Execute an approximate k-NN query and return hits by descending score.
    async fn vector_search(&self, request: &VectorRequest) -> Result<Vec<RetrievalHit>>;

    /// Create an index from a mapping/settings object.
    async fn create_index(&self, name: &str, mapping: &serde_json::Value) -> Result<IndexCreated>;

    /// Delete an index.
    async fn delete_index(&self, name: &str) -> Result<()>;

    /// Get document count, size and shard information.
    async fn index_stats(&self, name: &str) -> Result<IndexStats>;

    /// Index many documents in one request.
    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<IndexDocument>,
        refresh: bool,
    ) -> Result<BulkReport>;

    /// Index a single document and return its id.
    async fn index_document(
        &self,
        index: &str,
        document: IndexDocument,
        refresh: bool,
    ) -> Result<String>;

    /// Check that the backend is reachable.
    async fn health(&self) -> Result<ClusterHealth>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}
