//! REST API router and configuration.

use std::sync::Arc;

use axum::{
    http::{header, Method},
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::handlers::{
    create_index_handler, delete_index_handler, extract_keywords_handler, health_handler,
    index_document_handler, index_stats_handler, load_documents_handler, mapping_example_handler,
    metrics_handler, rerank_handler, search_handler, ApiState,
};
use crate::config::ServerConfig;
use crate::context::ServiceContext;

/// REST API configuration.
#[derive(Debug, Clone)]
pub struct RestApiConfig {
    /// Enable CORS.
    pub enable_cors: bool,
    /// API prefix (e.g., "/api/v1").
    pub prefix: String,
}

impl Default for RestApiConfig {
    fn default() -> Self {
        Self {
            enable_cors: true,
            prefix: "/api/v1".to_string(),
        }
    }
}

impl From<&ServerConfig> for RestApiConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            enable_cors: config.enable_cors,
            prefix: config.prefix.clone(),
        }
    }
}

/// Create the REST API router.
///
/// Endpoints under the prefix:
/// - POST   /search                  - Hybrid search
/// - POST   /indices                 - Create an index
/// - DELETE /indices/:name           - Delete an index
/// - GET    /indices/:name/stats     - Index statistics
/// - POST   /indices/:name/documents - Index one document
/// - POST   /documents/load          - Bulk load JSONL files
/// - GET    /mapping/example         - Recommended mapping
/// - POST   /keywords/extract        - LLM keyword extraction
/// - GET    /health                  - Service health
///
/// Plus `GET /metrics` and `GET /api` at the root.
pub fn create_rest_router(context: Arc<ServiceContext>, config: &RestApiConfig) -> Router {
    let state = Arc::new(ApiState::new(context));

    let api_routes = Router::new()
        .route("/search", post(search_handler))
        .route("/rerank", post(rerank_handler))
        .route("/indices", post(create_index_handler))
        .route("/indices/:name", delete(delete_index_handler))
        .route("/indices/:name/stats", get(index_stats_handler))
        .route("/indices/:name/documents", post(index_document_handler))
        .route("/documents/load", post(load_documents_handler))
        .route("/mapping/example", get(mapping_example_handler))
        .route("/keywords/extract", post(extract_keywords_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let router = Router::new()
        .nest(&config.prefix, api_routes)
        .route("/metrics", get(metrics_handler))
        .route("/api", get(api_info_handler))
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_origin(Any);

        router.layer(cors)
    } else {
        router
    }
}

/// Bind and serve until ctrl-c.
pub async fn serve(context: Arc<ServiceContext>, host: &str, port: u16) -> anyhow::Result<()> {
    let config = RestApiConfig::from(&context.config().server);
    let app = create_rest_router(context.clone(), &config);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("REST API listening on http://{}{}", addr, config.prefix);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    context.shutdown();
    Ok(())
}

/// API info handler.
async fn api_info_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "Hybrid Retrieval API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "BM25 + k-NN hybrid search over OpenSearch with cross-encoder reranking",
        "endpoints": {
            "search": {
                "method": "POST",
                "path": "/api/v1/search",
                "description": "Hybrid search",
                "body": {
                    "keywords": "Keyword or list of keywords (OR semantics)",
                    "query_text": "Natural language query (required)",
                    "top_k": "Fused candidates to keep, 1 to 50 (default: 10)",
                    "bm25_weight": "Lexical weight 0-1 (default: 0.3)",
                    "vector_weight": "Vector weight 0-1 (default: 0.7)",
                    "use_rerank": "Rerank with the cross-encoder (default: true)",
                    "rerank_top_k": "Results returned, 1 to 10 (default: 3)"
                }
            },
            "rerank": {
                "method": "POST",
                "path": "/api/v1/rerank",
                "description": "Rerank caller-supplied documents with the cross-encoder",
                "body": {
                    "query_text": "Natural language query (required)",
                    "documents": "List of {document_id, fused_score, source_fields}",
                    "top_k": "Results returned, 1 to 10 (default: 3)"
                }
            },
            "create_index": {
                "method": "POST",
                "path": "/api/v1/indices",
                "description": "Create an index from a mapping"
            },
            "delete_index": {
                "method": "DELETE",
                "path": "/api/v1/indices/:name",
                "description": "Delete an index"
            },
            "index_stats": {
                "method": "GET",
                "path": "/api/v1/indices/:name/stats",
                "description": "Document count, size and shards"
            },
            "index_document": {
                "method": "POST",
                "path": "/api/v1/indices/:name/documents",
                "description": "Embed and index one document"
            },
            "load_documents": {
                "method": "POST",
                "path": "/api/v1/documents/load",
                "description": "Bulk load JSONL files matching a glob"
            },
            "mapping_example": {
                "method": "GET",
                "path": "/api/v1/mapping/example",
                "description": "Recommended index mapping"
            },
            "extract_keywords": {
                "method": "POST",
                "path": "/api/v1/keywords/extract",
                "description": "Extract search keywords from a question"
            },
            "health": {
                "method": "GET",
                "path": "/api/v1/health",
                "description": "Service and backend health"
            },
            "metrics": {
                "method": "GET",
                "path": "/metrics",
                "description": "Prometheus metrics"
            }
        }
    }))
}
