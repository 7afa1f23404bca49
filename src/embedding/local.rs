//! Local embedding provider using fastembed-rs.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};

use super::EmbeddingProvider;

/// Local embedding provider using fastembed-rs with ONNX models.
pub struct LocalEmbeddingProvider {
    text_model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: usize,
    max_batch_size: usize,
}

impl LocalEmbeddingProvider {
    /// Load the configured model; its native dimension must equal `config.dimension`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dimension) = Self::parse_model_name(&config.model)?;
        if dimension != config.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: config.dimension,
                actual: dimension,
            }
            .into());
        }

        let mut options = InitOptions::new(model).with_show_download_progress(true);
        if let Some(dir) = &config.cache_dir {
            options = options.with_cache_dir(PathBuf::from(shellexpand::tilde(dir).as_ref()));
        }

        let text_model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::ModelNotFound(format!("{}: {}", config.model, e)))?;

        tracing::info!(model = %config.model, dimension, "Loaded local embedding model");

        Ok(Self {
            text_model: Arc::new(Mutex::new(text_model)),
            model_name: config.model.clone(),
            dimension,
            max_batch_size: config.batch_size.clamp(1, 64),
        })
    }

    fn parse_model_name(model_name: &str) -> Result<(EmbeddingModel, usize)> {
        match model_name {
            "intfloat/multilingual-e5-small" | "multilingual-e5-small" => {
                Ok((EmbeddingModel::MultilingualE5Small, 384))
            }
            "intfloat/multilingual-e5-base" | "multilingual-e5-base" => {
                Ok((EmbeddingModel::MultilingualE5Base, 768))
            }
            "intfloat/multilingual-e5-large" | "multilingual-e5-large" => {
                Ok((EmbeddingModel::MultilingualE5Large, 1024))
            }
            "BAAI/bge-small-en-v1.5" | "bge-small-en-v1.5" => {
                Ok((EmbeddingModel::BGESmallENV15, 384))
            }
            "BAAI/bge-large-en-v1.5" | "bge-large-en-v1.5" => {
                Ok((EmbeddingModel::BGELargeENV15, 1024))
            }
            _ => Err(EmbeddingError::ModelNotFound(format!(
                "Unknown model: {}. Supported: multilingual-e5-small/base/large, \
                bge-small-en-v1.5, bge-large-en-v1.5",
                model_name
            ))
            .into()),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        if texts.len() > self.max_batch_size {
            return Err(EmbeddingError::BatchTooLarge(texts.len(), self.max_batch_size).into());
        }

        let texts = texts.to_vec();
        let model = self.text_model.clone();

        // fastembed is synchronous
        let embeddings = tokio::task::spawn_blocking(move || {
            let mut model = model.blocking_lock();
            model.embed(texts, None)
        })
        .await
        .map_err(|e| EmbeddingError::Api(format!("Task join error: {}", e)))?
        .map_err(|e| EmbeddingError::Api(format!("Embedding failed: {}", e)))?;

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}
