//! Bulk loading of JSONL regulation files.
//!
//! Each non-blank line of a matched file is one document. The text field is
//! embedded into the vector field, the source path is stamped on the document
//! and the file is written with one or more bulk requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::embedding::BatchEmbeddingProcessor;
use crate::error::{IngestError, Result};
use crate::metrics::{get_metrics, Metrics};
use crate::storage::{BulkReport, IndexDocument, SearchBackend, SourceFields};

/// A document that failed to index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadError {
    pub file: String,
    /// Line number within the file, 1-based; 0 when the whole file failed.
    pub line: usize,
    pub document_id: Option<String>,
    pub reason: String,
}

/// Outcome of a bulk load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub indexed_count: usize,
    pub files_processed: usize,
    /// Blank-free lines that were not valid JSON objects or lacked text.
    pub skipped_lines: usize,
    pub errors: Vec<LoadError>,
}

/// A parsed line, remembering where it came from.
struct PendingDocument {
    line: usize,
    text: String,
    document: IndexDocument,
}

/// Loads JSONL files into an index.
pub struct BulkLoader {
    backend: Arc<dyn SearchBackend>,
    embedder: Arc<BatchEmbeddingProcessor>,
    config: IngestConfig,
    vector_field: String,
}

/// Stable id from the configured fields, e.g. `품질관리규정_제2장_제5조`.
///
/// `None` unless every field is present, leaving the id to the backend.
pub fn derive_document_id(source: &SourceFields, id_fields: &[String]) -> Option<String> {
    if id_fields.is_empty() {
        return None;
    }
    let parts = id_fields
        .iter()
        .map(|field| match source.get(field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect::<Option<Vec<String>>>()?;

    Some(parts.join("_"))
}

/// Where a derived id was first seen during a load.
type SeenIds = HashMap<String, (String, usize)>;

/// Expand a glob into a sorted list of files.
pub fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    let expanded = shellexpand::tilde(pattern);
    let paths = glob::glob(&expanded)
        .map_err(|e| IngestError::Pattern(format!("{}: {}", pattern, e)))?;

    let mut files: Vec<PathBuf> = paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Skipping unreadable path: {}", e);
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(IngestError::NoFilesMatched(pattern.to_string()).into());
    }
    Ok(files)
}

impl BulkLoader {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        embedder: Arc<BatchEmbeddingProcessor>,
        config: IngestConfig,
        vector_field: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            embedder,
            config,
            vector_field: vector_field.into(),
        }
    }

    /// Load every file matching `source_pattern` (the configured pattern when `None`).
    pub async fn load(&self, index_name: &str, source_pattern: Option<&str>) -> Result<LoadReport> {
        let pattern = source_pattern.unwrap_or(&self.config.source_pattern);
        let files = expand_pattern(pattern)?;
        info!(index = %index_name, pattern = %pattern, files = files.len(), "Starting bulk load");

        let metrics = get_metrics();
        let _timer = Metrics::start_timer(&metrics.indexing_duration_seconds);

        let mut report = LoadReport::default();
        let mut seen = SeenIds::new();
        let mut first_failure = None;
        for path in &files {
            match self.load_file(index_name, path, &mut report, &mut seen).await {
                Ok(()) => report.files_processed += 1,
                Err(e) => {
                    let file = path.display().to_string();
                    warn!(file = %file, "Failed to load file: {}", e);
                    report.errors.push(LoadError {
                        file,
                        line: 0,
                        document_id: None,
                        reason: e.to_string(),
                    });
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
        }

        if report.files_processed == 0 {
            if let Some(e) = first_failure {
                return Err(e);
            }
        }

        metrics
            .documents_indexed_total
            .inc_by(report.indexed_count as u64);
        metrics
            .indexing_errors_total
            .inc_by(report.errors.len() as u64);

        info!(
            index = %index_name,
            indexed = report.indexed_count,
            files = report.files_processed,
            skipped_lines = report.skipped_lines,
            errors = report.errors.len(),
            "Bulk load completed"
        );
        Ok(report)
    }

    async fn load_file(
        &self,
        index_name: &str,
        path: &Path,
        report: &mut LoadReport,
        seen: &mut SeenIds,
    ) -> Result<()> {
        let file = path.display().to_string();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| IngestError::Read {
                path: file.clone(),
                source,
            })?;

        let (pending, skipped) = self.parse_lines(&file, &content);
        report.skipped_lines += skipped;
        let pending = Self::drop_duplicates(&file, pending, seen, report);
        if pending.is_empty() {
            warn!(file = %file, "No documents found");
            return Ok(());
        }

        let texts: Vec<String> = pending.iter().map(|p| p.text.clone()).collect();
        let vectors = self.embedder.embed_all(&texts).await?;

        let mut lines = Vec::with_capacity(pending.len());
        let mut documents = Vec::with_capacity(pending.len());
        for (mut p, vector) in pending.into_iter().zip(vectors) {
            p.document
                .source
                .insert(self.vector_field.clone(), Value::from(vector));
            lines.push(p.line);
            documents.push(p.document);
        }

        // Counted per chunk so a later failure keeps what was already written.
        let mut indexed = 0;
        let mut offset = 0;
        let mut remaining = documents;
        while !remaining.is_empty() {
            let rest = remaining.split_off(remaining.len().min(self.config.batch_size.max(1)));
            let batch_len = remaining.len();
            let mut batch = BulkReport::default();
            batch.merge(
                self.backend
                    .bulk_index(index_name, remaining, self.config.refresh)
                    .await?,
                offset,
            );

            indexed += batch.indexed_count;
            report.indexed_count += batch.indexed_count;
            report
                .errors
                .extend(batch.errors.into_iter().map(|e| LoadError {
                    file: file.clone(),
                    line: lines.get(e.position).copied().unwrap_or(0),
                    document_id: e.document_id,
                    reason: e.reason,
                }));
            offset += batch_len;
            remaining = rest;
        }

        debug!(file = %file, indexed, "Indexed file");
        Ok(())
    }

    /// Keep the first line for each derived id; later ones become errors.
    fn drop_duplicates(
        file: &str,
        pending: Vec<PendingDocument>,
        seen: &mut SeenIds,
        report: &mut LoadReport,
    ) -> Vec<PendingDocument> {
        let mut unique = Vec::with_capacity(pending.len());
        for p in pending {
            let Some(id) = p.document.id.clone() else {
                unique.push(p);
                continue;
            };
            match seen.get(&id) {
                Some((first_file, first_line)) => {
                    warn!(file = %file, line = p.line, id = %id, "Skipping duplicate document id");
                    report.errors.push(LoadError {
                        file: file.to_string(),
                        line: p.line,
                        reason: format!(
                            "duplicate document id, first seen at {}:{}",
                            first_file, first_line
                        ),
                        document_id: Some(id),
                    });
                }
                None => {
                    seen.insert(id, (file.to_string(), p.line));
                    unique.push(p);
                }
            }
        }
        unique
    }

    fn parse_lines(&self, file: &str, content: &str) -> (Vec<PendingDocument>, usize) {
        let mut pending = Vec::new();
        let mut skipped = 0;

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let line_no = idx + 1;

            let source = match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    warn!(file = %file, line = line_no, "Skipping non-object line");
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(file = %file, line = line_no, "Skipping malformed line: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            match self.prepare(source, Some(file), None) {
                Some((text, document)) => pending.push(PendingDocument {
                    line: line_no,
                    text,
                    document,
                }),
                None => {
                    warn!(
                        file = %file,
                        line = line_no,
                        "Skipping line without text field '{}'",
                        self.config.text_field
                    );
                    skipped += 1;
                }
            }
        }

        (pending, skipped)
    }

    /// Pull out the text to embed and build the document, or `None` without text.
    fn prepare(
        &self,
        mut source: SourceFields,
        file: Option<&str>,
        id: Option<String>,
    ) -> Option<(String, IndexDocument)> {
        let text = source
            .get(&self.config.text_field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())?
            .to_string();

        if let Some(file) = file {
            source.insert(
                self.config.source_file_field.clone(),
                Value::String(file.to_string()),
            );
        }
        let id = id.or_else(|| derive_document_id(&source, &self.config.id_fields));

        Some((text, IndexDocument { id, source }))
    }

    /// Embed and index a single document, returning its id.
    ///
    /// A document that already carries a vector is indexed as is.
    pub async fn index_one(
        &self,
        index_name: &str,
        source: SourceFields,
        id: Option<String>,
    ) -> Result<String> {
        let document = if source.contains_key(&self.vector_field) {
            let id = id.or_else(|| derive_document_id(&source, &self.config.id_fields));
            IndexDocument { id, source }
        } else {
            let (text, mut document) = self.prepare(source, None, id).ok_or_else(|| {
                crate::error::HybridError::invalid_query(format!(
                    "document must contain a non-empty '{}' field",
                    self.config.text_field
                ))
            })?;
            let vector = self.embedder.embed_all(&[text]).await?;
            if let Some(vector) = vector.into_iter().next() {
                document
                    .source
                    .insert(self.vector_field.clone(), Value::from(vector));
            }
            document
        };

        let document_id = self
            .backend
            .index_document(index_name, document, self.config.refresh)
            .await?;
        get_metrics().documents_indexed_total.inc();
        Ok(document_id)
    }
}
