//! Command handlers for CLI operations.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use hybrid_retrieval::search::SearchRequest;
use hybrid_retrieval::storage::SourceFields;
use hybrid_retrieval::{Config, ServiceContext};
use serde_json::Value;

use super::output::{
    print_index_created, print_json, print_keywords, print_load_report, print_message,
    print_search_results, print_stats,
};

/// Options for the `search` command.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub query_text: String,
    pub keywords: Vec<String>,
    pub top_k: usize,
    pub bm25_weight: f32,
    pub vector_weight: f32,
    pub use_rerank: bool,
    pub rerank_top_k: usize,
    pub index: Option<String>,
}

impl SearchOptions {
    fn into_request(self) -> SearchRequest {
        let mut request = SearchRequest::new(self.query_text)
            .keywords(self.keywords)
            .top_k(self.top_k)
            .weights(self.bm25_weight, self.vector_weight)
            .use_rerank(self.use_rerank)
            .rerank_top_k(self.rerank_top_k);
        if let Some(index) = self.index {
            request = request.index(index);
        }
        request
    }
}

async fn context(config: Config) -> anyhow::Result<Arc<ServiceContext>> {
    Ok(Arc::new(ServiceContext::init(config).await?))
}

fn read_json(path: &str) -> anyhow::Result<Value> {
    let expanded = shellexpand::tilde(path);
    let content = std::fs::read_to_string(Path::new(expanded.as_ref()))
        .with_context(|| format!("Failed to read {}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path))
}

/// Run a hybrid search.
pub async fn run_search(config: Config, options: SearchOptions, json: bool) -> anyhow::Result<()> {
    let ctx = context(config).await?;
    let response = ctx.search(options.into_request()).await?;
    print_search_results(&response, json)
}

/// Create an index from a mapping file, or the recommended mapping.
pub async fn run_create_index(
    config: Config,
    name: String,
    mapping_path: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let ctx = context(config).await?;
    let mapping = mapping_path.as_deref().map(read_json).transpose()?;
    let created = ctx.create_index(&name, mapping).await?;
    print_index_created(&created, json)
}

/// Delete an index.
pub async fn run_delete_index(config: Config, name: String, json: bool) -> anyhow::Result<()> {
    let ctx = context(config).await?;
    ctx.delete_index(&name).await?;
    print_message(&format!("Deleted index '{}'", name), json)
}

/// Show index statistics.
pub async fn run_stats(config: Config, name: String, json: bool) -> anyhow::Result<()> {
    let ctx = context(config).await?;
    let stats = ctx.index_stats(&name).await?;
    print_stats(&stats, json)
}

/// Bulk load JSONL files.
pub async fn run_load(
    config: Config,
    index: Option<String>,
    pattern: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let ctx = context(config).await?;
    let report = ctx
        .load_documents(index.as_deref(), pattern.as_deref())
        .await?;
    print_load_report(&report, json)
}

/// Index one document from a JSON file.
pub async fn run_index_document(
    config: Config,
    index: String,
    path: String,
    id: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let document: SourceFields = match read_json(&path)? {
        Value::Object(map) => map,
        _ => anyhow::bail!("{} must contain a JSON object", path),
    };

    let ctx = context(config).await?;
    let document_id = ctx.index_document(&index, document, id).await?;
    if json {
        print_json(&serde_json::json!({ "index_name": index, "document_id": document_id }))
    } else {
        print_message(&format!("Indexed document '{}' into '{}'", document_id, index), false)
    }
}

/// Extract keywords from a question.
pub async fn run_keywords(mut config: Config, text: String, json: bool) -> anyhow::Result<()> {
    // an explicit command implies the extractor is wanted
    config.keywords.enabled = true;
    let ctx = context(config).await?;
    let extracted = ctx.extract_keywords(&text).await?;
    print_keywords(&extracted, json)
}

/// Print the recommended index mapping.
pub fn run_mapping(config: &Config) -> anyhow::Result<()> {
    let mapping = hybrid_retrieval::storage::IndexSchema::new(config.embedding.dimension)
        .with_vector_field(config.search.vector_field.clone())
        .to_mapping();
    print_json(&mapping)
}
