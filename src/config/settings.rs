//! Configuration settings for the hybrid retrieval service.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub opensearch: OpenSearchConfig,
    pub embedding: EmbeddingConfig,
    pub reranker: RerankerConfig,
    pub search: SearchConfig,
    pub ingest: IngestConfig,
    pub keywords: KeywordConfig,
}

impl Config {
    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content).map_err(ConfigError::Parse)?)
    }

    fn read_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// First existing file among the default locations.
    fn locate() -> Option<PathBuf> {
        let config_paths = [
            PathBuf::from("hybrid-retrieval.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("hybrid-retrieval/config.toml"))
                .unwrap_or_default(),
        ];

        config_paths.into_iter().find(|path| path.exists())
    }

    /// Load from an explicit path (or the default locations), then apply
    /// environment overrides and validate the result.
    pub fn resolve(path: Option<&str>) -> Result<Self> {
        Self::resolve_with(path, |key| {
            std::env::var(key).ok().filter(|v| !v.is_empty())
        })
    }

    /// [`Config::resolve`] with an arbitrary variable lookup.
    pub fn resolve_with(path: Option<&str>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(PathBuf::from(shellexpand::tilde(path).as_ref())),
            None => Self::locate(),
        };
        let mut config = match path {
            Some(path) => {
                tracing::info!("Loading config from: {}", path.display());
                Self::read_file(path)?
            }
            None => {
                tracing::info!("No config file found, using defaults");
                Config::default()
            }
        };
        config.apply_overrides_from(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("OPENSEARCH_URL") {
            self.opensearch.url = url;
        } else {
            let host = lookup("OPENSEARCH_HOST");
            let port = lookup("OPENSEARCH_PORT");
            if host.is_some() || port.is_some() {
                let scheme = if self.opensearch.url.starts_with("https://") {
                    "https"
                } else {
                    "http"
                };
                self.opensearch.url = format!(
                    "{}://{}:{}",
                    scheme,
                    host.as_deref().unwrap_or("localhost"),
                    port.as_deref().unwrap_or("9200")
                );
            }
        }
        if let Some(username) = lookup("OPENSEARCH_USERNAME") {
            self.opensearch.username = Some(username);
        }
        if let Some(password) = lookup("OPENSEARCH_ADMIN_PASSWORD") {
            self.opensearch.password = Some(password);
        }
        if let Some(url) = lookup("EMBEDDING_API_URL") {
            self.embedding.api.base_url = url;
        }
        if let Some(url) = lookup("RERANKER_API_URL") {
            self.reranker.api.url = url;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            if self.keywords.api_key.is_none() {
                self.keywords.api_key = Some(key.clone());
            }
            if self.embedding.api.api_key.is_none() {
                self.embedding.api.api_key = Some(key);
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.opensearch.backend == BackendType::OpenSearch && self.opensearch.url.is_empty() {
            return Err(ConfigError::MissingField("opensearch.url".to_string()).into());
        }

        if self.embedding.dimension == 0 {
            return Err(ConfigError::Invalid("embedding.dimension must be > 0".to_string()).into());
        }
        if self.embedding.provider == EmbeddingProviderType::Api
            && self.embedding.api.base_url.is_empty()
        {
            return Err(ConfigError::MissingField("embedding.api.base_url".to_string()).into());
        }

        if self.reranker.provider == RerankerProviderType::Api && self.reranker.api.url.is_empty() {
            return Err(ConfigError::MissingField("reranker.api.url".to_string()).into());
        }
        if self.reranker.concurrency == 0 {
            return Err(ConfigError::Invalid("reranker.concurrency must be > 0".to_string()).into());
        }

        if self.search.fetch_multiplier == 0 {
            return Err(
                ConfigError::Invalid("search.fetch_multiplier must be > 0".to_string()).into(),
            );
        }
        if self.search.lexical_fields.is_empty() {
            return Err(ConfigError::MissingField("search.lexical_fields".to_string()).into());
        }
        if self.search.vector_field.is_empty() {
            return Err(ConfigError::MissingField("search.vector_field".to_string()).into());
        }

        if self.ingest.batch_size == 0 {
            return Err(ConfigError::Invalid("ingest.batch_size must be > 0".to_string()).into());
        }

        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Route prefix for the REST API (e.g. "/api/v1")
    pub prefix: String,
    pub enable_cors: bool,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            prefix: "/api/v1".to_string(),
            enable_cors: true,
            json_logs: false,
        }
    }
}

/// Search backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// OpenSearch cluster over its REST API
    OpenSearch,
    /// In-process index (tests and offline demos)
    Memory,
}

/// OpenSearch connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenSearchConfig {
    pub backend: BackendType,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
    /// Disable for self-signed development clusters
    pub verify_tls: bool,
    /// Index used when a request does not name one
    pub default_index: String,
}

impl Default for OpenSearchConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::OpenSearch,
            url: "http://localhost:9200".to_string(),
            username: Some("admin".to_string()),
            password: None,
            timeout_secs: 30,
            verify_tls: true,
            default_index: "internal_regulations_index".to_string(),
        }
    }
}

/// Embedding provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    Api,
    Local,
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderType,
    /// Output dimension; must match the index vector field
    pub dimension: usize,
    /// Model name for local embeddings
    pub model: String,
    /// Model download directory for local embeddings
    pub cache_dir: Option<String>,
    pub api: ApiEmbeddingConfig,
    /// Texts per embedding request during ingestion
    pub batch_size: usize,
    /// Upper bound on embedding requests per second during ingestion
    pub requests_per_second: u32,
    pub max_retries: u32,
    pub cache: CacheConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::Api,
            dimension: 1024,
            model: "intfloat/multilingual-e5-large".to_string(),
            cache_dir: None,
            api: ApiEmbeddingConfig::default(),
            batch_size: 32,
            requests_per_second: 20,
            max_retries: 3,
            cache: CacheConfig::default(),
        }
    }
}

/// OpenAI-compatible embedding API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiEmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiEmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081/v1".to_string(),
            model: "dragonkue/snowflake-arctic-embed-l-v2.0-ko".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Query embedding cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl_secs: 3600,
        }
    }
}

/// Reranker provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankerProviderType {
    /// Cross-encoder served over HTTP
    Api,
    /// Local fastembed cross-encoder
    Local,
}

/// Reranker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub provider: RerankerProviderType,
    pub api: ApiRerankerConfig,
    /// Model name for the local cross-encoder
    pub model: String,
    /// Model download directory for the local cross-encoder
    pub cache_dir: Option<String>,
    /// Maximum in-flight scoring calls per request
    pub concurrency: usize,
    /// Timeout for a single scoring call
    pub timeout_ms: u64,
    /// Retries per candidate after the first failure
    pub retries: u32,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: RerankerProviderType::Api,
            api: ApiRerankerConfig::default(),
            model: "bge-reranker-v2-m3".to_string(),
            cache_dir: None,
            concurrency: 4,
            timeout_ms: 10_000,
            retries: 1,
        }
    }
}

/// HTTP cross-encoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiRerankerConfig {
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiRerankerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8082/rerank".to_string(),
            model: "dragonkue/bge-reranker-v2-m3-ko".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Retrieval and query construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Lexical fields with optional `^boost` suffix
    pub lexical_fields: Vec<String>,
    pub vector_field: String,
    /// Fields concatenated, in order, into the reranker candidate text
    pub rerank_fields: Vec<String>,
    /// Fields never returned in `source_fields`
    pub excluded_source_fields: Vec<String>,
    /// Per-stream over-fetch factor applied to max(top_k, rerank_top_k)
    pub fetch_multiplier: usize,
    pub fuzziness: String,
    pub retrieval_timeout_ms: u64,
    pub embedding_timeout_ms: u64,
    pub embedding_retries: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lexical_fields: vec![
                "문서내용^2".to_string(),
                "문서명^1.5".to_string(),
                "장^1.2".to_string(),
                "조^1.0".to_string(),
            ],
            vector_field: "content_vector".to_string(),
            rerank_fields: vec![
                "문서명".to_string(),
                "장".to_string(),
                "조".to_string(),
                "문서내용".to_string(),
            ],
            excluded_source_fields: vec!["content_vector".to_string()],
            fetch_multiplier: 2,
            fuzziness: "AUTO".to_string(),
            retrieval_timeout_ms: 10_000,
            embedding_timeout_ms: 10_000,
            embedding_retries: 1,
        }
    }
}

/// Bulk ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub source_pattern: String,
    /// Field embedded into the vector field
    pub text_field: String,
    /// Field stamped with the originating file path
    pub source_file_field: String,
    /// Fields joined into a deterministic document id
    pub id_fields: Vec<String>,
    /// Documents per bulk request
    pub batch_size: usize,
    pub refresh: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_pattern: "data/*.jsonl".to_string(),
            text_field: "문서내용".to_string(),
            source_file_field: "출처파일".to_string(),
            id_fields: vec!["문서명".to_string(), "장".to_string(), "조".to_string()],
            batch_size: 500,
            refresh: true,
        }
    }
}

/// LLM keyword extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_keywords: usize,
    pub timeout_secs: u64,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key: None,
            max_keywords: 5,
            timeout_secs: 30,
        }
    }
}
