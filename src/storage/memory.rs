//! In-process search backend.
//!
//! Lexical scoring is a boosted term-occurrence count and vector scoring
//! follows OpenSearch's `cosinesimil` convention, `(1 + cos) / 2`. Good enough
//! for tests and offline demos; not a BM25 implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::{BackendError, Result};
use crate::search::{parse_field_boost, LexicalRequest, VectorRequest};

use super::schema::vector_dimension;
use super::{
    BulkItemError, BulkReport, ClusterHealth, IndexCreated, IndexDocument, IndexStats,
    RetrievalHit, SearchBackend, ShardInfo, SourceFields,
};

#[derive(Default)]
struct MemoryIndex {
    mapping: Value,
    documents: BTreeMap<String, SourceFields>,
    next_id: u64,
}

impl MemoryIndex {
    fn declared_dimension(&self, field: &str) -> Option<usize> {
        vector_dimension(&self.mapping, field)
    }

    /// Reject documents whose vectors disagree with the declared dimension.
    fn check_vectors(&self, source: &SourceFields) -> std::result::Result<(), String> {
        for (field, value) in source {
            if let (Some(expected), Some(values)) =
                (self.declared_dimension(field), value.as_array())
            {
                if values.len() != expected {
                    return Err(format!(
                        "mapper_parsing_exception: vector length [{}] does not match dimension [{}] of field [{}]",
                        values.len(),
                        expected,
                        field
                    ));
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, document: IndexDocument) -> std::result::Result<String, String> {
        self.check_vectors(&document.source)?;
        let id = document.id.unwrap_or_else(|| {
            self.next_id += 1;
            format!("auto-{}", self.next_id)
        });
        self.documents.insert(id.clone(), document.source);
        Ok(id)
    }
}

/// Search backend holding all indices in memory.
#[derive(Default)]
pub struct MemoryBackend {
    indices: RwLock<HashMap<String, MemoryIndex>>,
}

fn without_fields(source: &SourceFields, excluded: &[String]) -> SourceFields {
    source
        .iter()
        .filter(|(k, _)| !excluded.iter().any(|e| e == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_lowercase(),
        Value::Array(items) => items
            .iter()
            .map(field_text)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn rank(mut hits: Vec<RetrievalHit>, size: usize) -> Vec<RetrievalHit> {
    hits.sort_by(|a, b| {
        b.raw_score
            .total_cmp(&a.raw_score)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    hits.truncate(size);
    hits
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in an index (0 when missing).
    pub fn document_count(&self, index: &str) -> usize {
        self.indices
            .read()
            .get(index)
            .map(|i| i.documents.len())
            .unwrap_or(0)
    }

    /// Fetch a stored document.
    pub fn get_document(&self, index: &str, id: &str) -> Option<SourceFields> {
        self.indices
            .read()
            .get(index)
            .and_then(|i| i.documents.get(id).cloned())
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn lexical_search(&self, request: &LexicalRequest) -> Result<Vec<RetrievalHit>> {
        let indices = self.indices.read();
        let index = indices
            .get(&request.index)
            .ok_or_else(|| BackendError::IndexNotFound(request.index.clone()))?;

        let keywords: Vec<String> = request.keywords.iter().map(|k| k.to_lowercase()).collect();
        let fields: Vec<(&str, f32)> = request.fields.iter().map(|f| parse_field_boost(f)).collect();

        let hits = index
            .documents
            .iter()
            .filter_map(|(id, source)| {
                let score: f32 = fields
                    .iter()
                    .filter_map(|(field, boost)| source.get(*field).map(|v| (field_text(v), boost)))
                    .map(|(text, boost)| {
                        keywords
                            .iter()
                            .map(|k| text.matches(k.as_str()).count() as f32)
                            .sum::<f32>()
                            * boost
                    })
                    .sum();

                (score > 0.0).then(|| RetrievalHit {
                    document_id: id.clone(),
                    raw_score: score,
                    source_fields: without_fields(source, &request.excluded_fields),
                })
            })
            .collect();

        Ok(rank(hits, request.size))
    }

    async fn vector_search(&self, request: &VectorRequest) -> Result<Vec<RetrievalHit>> {
        let indices = self.indices.read();
        let index = indices
            .get(&request.index)
            .ok_or_else(|| BackendError::IndexNotFound(request.index.clone()))?;

        if let Some(expected) = index.declared_dimension(&request.field) {
            if expected != request.vector.len() {
                return Err(BackendError::Rejected {
                    status: 400,
                    reason: format!(
                        "query vector has {} dimensions, field [{}] declares {}",
                        request.vector.len(),
                        request.field,
                        expected
                    ),
                }
                .into());
            }
        }

        let hits = index
            .documents
            .iter()
            .filter_map(|(id, source)| {
                let stored: Vec<f32> = source
                    .get(&request.field)?
                    .as_array()?
                    .iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect();
                if stored.len() != request.vector.len() {
                    return None;
                }
                Some(RetrievalHit {
                    document_id: id.clone(),
                    raw_score: (1.0 + cosine_similarity(&request.vector, &stored)) / 2.0,
                    source_fields: without_fields(source, &request.excluded_fields),
                })
            })
            .collect();

        Ok(rank(hits, request.k))
    }

    async fn create_index(&self, name: &str, mapping: &Value) -> Result<IndexCreated> {
        let mut indices = self.indices.write();
        if indices.contains_key(name) {
            return Ok(IndexCreated {
                index_name: name.to_string(),
                acknowledged: false,
                already_exists: true,
            });
        }

        indices.insert(
            name.to_string(),
            MemoryIndex {
                mapping: mapping.clone(),
                ..Default::default()
            },
        );
        tracing::info!("Created in-memory index: {}", name);
        Ok(IndexCreated {
            index_name: name.to_string(),
            acknowledged: true,
            already_exists: false,
        })
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        self.indices
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::IndexNotFound(name.to_string()).into())
    }

    async fn index_stats(&self, name: &str) -> Result<IndexStats> {
        let indices = self.indices.read();
        let index = indices
            .get(name)
            .ok_or_else(|| BackendError::IndexNotFound(name.to_string()))?;

        let size_bytes = index
            .documents
            .values()
            .map(|doc| serde_json::to_vec(doc).map(|b| b.len() as u64).unwrap_or(0))
            .sum();

        Ok(IndexStats {
            index_name: name.to_string(),
            doc_count: index.documents.len() as u64,
            size_bytes,
            shard_info: ShardInfo {
                total: 1,
                successful: 1,
                failed: 0,
            },
        })
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<IndexDocument>,
        _refresh: bool,
    ) -> Result<BulkReport> {
        let mut indices = self.indices.write();
        // bulk writes auto-create missing indices, as OpenSearch does
        let target = indices.entry(index.to_string()).or_default();

        let mut report = BulkReport::default();
        for (position, document) in documents.into_iter().enumerate() {
            let document_id = document.id.clone();
            match target.insert(document) {
                Ok(_) => report.indexed_count += 1,
                Err(reason) => report.errors.push(BulkItemError {
                    position,
                    document_id,
                    reason,
                }),
            }
        }
        Ok(report)
    }

    async fn index_document(
        &self,
        index: &str,
        document: IndexDocument,
        _refresh: bool,
    ) -> Result<String> {
        let mut indices = self.indices.write();
        let target = indices.entry(index.to_string()).or_default();
        target.insert(document).map_err(|reason| {
            BackendError::Rejected {
                status: 400,
                reason,
            }
            .into()
        })
    }

    async fn health(&self) -> Result<ClusterHealth> {
        Ok(ClusterHealth {
            cluster_name: "memory".to_string(),
            status: "green".to_string(),
            number_of_nodes: 1,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
