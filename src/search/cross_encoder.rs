//! Local cross-encoder scoring using fastembed ONNX models.
//!
//! Enabled with the `local-models` feature. The default multilingual
//! `bge-reranker-v2-m3` handles Korean regulation text.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use tokio::sync::Mutex;

use crate::config::RerankerConfig;
use crate::error::{RerankError, Result};

use super::reranker::Reranker;

/// Resolve a configured model name to a fastembed reranker.
fn parse_model_name(name: &str) -> Option<(RerankerModel, &'static str)> {
    match name.to_lowercase().as_str() {
        "bge-reranker-v2-m3" | "baai/bge-reranker-v2-m3" | "rozgo/bge-reranker-v2-m3" => {
            Some((RerankerModel::BGERerankerV2M3, "rozgo/bge-reranker-v2-m3"))
        }
        "bge-reranker-base" | "baai/bge-reranker-base" => {
            Some((RerankerModel::BGERerankerBase, "BAAI/bge-reranker-base"))
        }
        "jina-reranker-v2-base-multilingual" | "jinaai/jina-reranker-v2-base-multilingual" => Some((
            RerankerModel::JINARerankerV2BaseMultiligual,
            "jinaai/jina-reranker-v2-base-multilingual",
        )),
        _ => None,
    }
}

/// In-process cross-encoder.
///
/// Inference runs on the blocking pool; the model handle is shared across
/// requests and loaded once.
pub struct LocalCrossEncoder {
    model: Arc<Mutex<TextRerank>>,
    model_name: &'static str,
}

impl LocalCrossEncoder {
    /// Load the configured model, downloading it on first use.
    pub fn from_config(config: &RerankerConfig) -> Result<Self> {
        let (model, model_name) = parse_model_name(&config.model).ok_or_else(|| {
            RerankError::ModelNotFound(format!(
                "Unknown cross-encoder model: {}. Supported: bge-reranker-v2-m3, \
                 bge-reranker-base, jina-reranker-v2-base-multilingual",
                config.model
            ))
        })?;

        let mut options = RerankInitOptions::new(model).with_show_download_progress(true);
        if let Some(dir) = &config.cache_dir {
            options = options.with_cache_dir(PathBuf::from(shellexpand::tilde(dir).as_ref()));
        }

        let model = TextRerank::try_new(options)
            .map_err(|e| RerankError::ModelNotFound(format!("{}: {}", model_name, e)))?;

        tracing::info!(model = model_name, "Loaded local cross-encoder");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name,
        })
    }
}

#[async_trait]
impl Reranker for LocalCrossEncoder {
    async fn score(&self, query: &str, candidate_text: &str) -> Result<f32> {
        let model = self.model.clone();
        let query = query.to_string();
        let text = candidate_text.to_string();

        let results = tokio::task::spawn_blocking(move || {
            let mut model = model.blocking_lock();
            model.rerank(query.as_str(), vec![text.as_str()], false, None)
        })
        .await
        .map_err(|e| RerankError::Api(format!("Cross-encoder task failed: {}", e)))?
        .map_err(|e| RerankError::Api(format!("Reranking failed: {}", e)))?;

        results
            .into_iter()
            .find(|r| r.index == 0)
            .map(|r| r.score)
            .ok_or_else(|| RerankError::Api("Cross-encoder returned no score".to_string()).into())
    }

    fn name(&self) -> &str {
        self.model_name
    }
}
