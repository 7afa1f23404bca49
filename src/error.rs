//! Error types for the hybrid retrieval service.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for retrieval, indexing and ingestion operations.
#[derive(Error, Debug)]
pub enum HybridError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Reranking error: {0}")]
    Rerank(#[from] RerankError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Keyword extraction error: {0}")]
    Keywords(#[from] KeywordError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Request validation errors.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Embedding-related errors.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Embedding API error: {0}")]
    Api(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Embedding timed out after {0}ms")]
    Timeout(u64),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Batch too large: {0} exceeds max {1}")]
    BatchTooLarge(usize, usize),
}

/// Reranker-related errors.
#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker API error: {0}")]
    Api(String),

    #[error("Reranking timed out after {0}ms")]
    Timeout(u64),

    #[error("Reranker model not found: {0}")]
    ModelNotFound(String),

    #[error("All {failed} rerank calls failed")]
    Unavailable { failed: usize },
}

/// Search backend errors.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Backend request timed out after {0}ms")]
    Timeout(u64),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Backend rejected request ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Backend failure ({status}): {reason}")]
    Server { status: u16, reason: String },

    #[error("Malformed backend response: {0}")]
    Response(String),
}

/// Bulk ingestion errors.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("No files match pattern: {0}")]
    NoFilesMatched(String),

    #[error("Invalid source pattern: {0}")]
    Pattern(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Keyword extraction errors.
#[derive(Error, Debug)]
pub enum KeywordError {
    #[error("Keyword extraction is not configured")]
    NotConfigured,

    #[error("Keyword extraction API error: {0}")]
    Api(String),
}

/// Stable error classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidQuery,
    EmbeddingUnavailable,
    RerankingUnavailable,
    BackendUnavailable,
    /// Only ever reported as a diagnostic warning, never as a request failure.
    PartialRerankFailure,
    NotFound,
    KeywordExtractionUnavailable,
    Configuration,
    Internal,
}

impl ErrorKind {
    /// Wire code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidQuery => "invalid_query",
            ErrorKind::EmbeddingUnavailable => "embedding_unavailable",
            ErrorKind::RerankingUnavailable => "reranking_unavailable",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::PartialRerankFailure => "partial_rerank_failure",
            ErrorKind::NotFound => "not_found",
            ErrorKind::KeywordExtractionUnavailable => "keyword_extraction_unavailable",
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl HybridError {
    /// Shorthand for a request validation failure.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        HybridError::Search(SearchError::InvalidQuery(message.into()))
    }

    /// Classify this error into its stable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HybridError::Config(_) => ErrorKind::Configuration,
            HybridError::Search(SearchError::InvalidQuery(_)) => ErrorKind::InvalidQuery,
            HybridError::Embedding(_) => ErrorKind::EmbeddingUnavailable,
            HybridError::Rerank(_) => ErrorKind::RerankingUnavailable,
            HybridError::Backend(err) => match err {
                BackendError::IndexNotFound(_) => ErrorKind::NotFound,
                BackendError::Rejected { .. } => ErrorKind::InvalidQuery,
                _ => ErrorKind::BackendUnavailable,
            },
            HybridError::Ingest(err) => match err {
                IngestError::NoFilesMatched(_) => ErrorKind::NotFound,
                IngestError::Pattern(_) => ErrorKind::InvalidQuery,
                IngestError::Read { .. } => ErrorKind::Internal,
            },
            HybridError::Keywords(_) => ErrorKind::KeywordExtractionUnavailable,
            HybridError::Io(_) | HybridError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias for hybrid retrieval operations.
pub type Result<T> = std::result::Result<T, HybridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HybridError::Config(ConfigError::MissingField("embedding.dimension".to_string()));
        assert!(err.to_string().contains("embedding.dimension"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: HybridError = io_err.into();
        assert!(matches!(err, HybridError::Io(_)));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            HybridError::invalid_query("rerank_top_k > top_k").kind(),
            ErrorKind::InvalidQuery
        );
        assert_eq!(
            HybridError::from(EmbeddingError::Timeout(500)).kind(),
            ErrorKind::EmbeddingUnavailable
        );
        assert_eq!(
            HybridError::from(RerankError::Unavailable { failed: 3 }).kind(),
            ErrorKind::RerankingUnavailable
        );
        assert_eq!(
            HybridError::from(BackendError::Connection("refused".into())).kind(),
            ErrorKind::BackendUnavailable
        );
        assert_eq!(
            HybridError::from(BackendError::IndexNotFound("docs".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            HybridError::from(BackendError::Rejected {
                status: 400,
                reason: "mapper_parsing_exception".into()
            })
            .kind(),
            ErrorKind::InvalidQuery
        );
    }

    #[test]
    fn test_error_kind_codes() {
        assert_eq!(ErrorKind::InvalidQuery.code(), "invalid_query");
        assert_eq!(ErrorKind::PartialRerankFailure.to_string(), "partial_rerank_failure");
        let json = serde_json::to_string(&ErrorKind::BackendUnavailable).unwrap();
        assert_eq!(json, "\"backend_unavailable\"");
    }
}
