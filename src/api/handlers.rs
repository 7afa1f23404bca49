//! REST API request handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ServiceContext;
use crate::error::{ErrorKind, HybridError};
use crate::metrics::get_metrics;
use crate::search::{RerankRequest, SearchRequest};
use crate::storage::SourceFields;

/// Shared state for API handlers.
pub struct ApiState {
    pub context: Arc<ServiceContext>,
}

impl ApiState {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Index creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateIndexRequest {
    pub index_name: String,
    /// Mapping/settings object; the recommended mapping when absent.
    #[serde(default)]
    pub mapping: Option<Value>,
}

/// Index deletion response.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteIndexResponse {
    pub index_name: String,
    pub deleted: bool,
}

/// Single document indexing request.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexDocumentRequest {
    pub document: SourceFields,
    #[serde(default)]
    pub id: Option<String>,
}

/// Single document indexing response.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDocumentResponse {
    pub index_name: String,
    pub document_id: String,
}

/// Bulk load request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadRequest {
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub source_pattern: Option<String>,
}

/// Keyword extraction request.
#[derive(Debug, Clone, Deserialize)]
pub struct KeywordRequest {
    pub user_input: String,
}

/// Error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidQuery => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::EmbeddingUnavailable
        | ErrorKind::RerankingUnavailable
        | ErrorKind::BackendUnavailable
        | ErrorKind::KeywordExtractionUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::PartialRerankFailure | ErrorKind::Configuration | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Render an error with its stable code.
pub fn error_response(err: HybridError) -> Response {
    let kind = err.kind();
    (
        status_for(kind),
        Json(ErrorResponse {
            error: err.to_string(),
            code: kind.code().to_string(),
        }),
    )
        .into_response()
}

/// Unwrap a JSON body, answering malformed input with `invalid_query`.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| error_response(HybridError::invalid_query(rejection.body_text())))
}

fn respond<T: Serialize>(result: crate::error::Result<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Handler Functions
// ============================================================================

/// POST /search
pub async fn search_handler(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    respond(state.context.search(request).await)
}

/// POST /rerank
pub async fn rerank_handler(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<RerankRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    respond(state.context.rerank(request).await)
}

/// POST /indices
pub async fn create_index_handler(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<CreateIndexRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    respond(
        state
            .context
            .create_index(&request.index_name, request.mapping)
            .await,
    )
}

/// DELETE /indices/:name
pub async fn delete_index_handler(
    State(state): State<Arc<ApiState>>,
    Path(index_name): Path<String>,
) -> Response {
    respond(
        state
            .context
            .delete_index(&index_name)
            .await
            .map(|_| DeleteIndexResponse {
                index_name,
                deleted: true,
            }),
    )
}

/// GET /indices/:name/stats
pub async fn index_stats_handler(
    State(state): State<Arc<ApiState>>,
    Path(index_name): Path<String>,
) -> Response {
    respond(state.context.index_stats(&index_name).await)
}

/// POST /indices/:name/documents
pub async fn index_document_handler(
    State(state): State<Arc<ApiState>>,
    Path(index_name): Path<String>,
    payload: Result<Json<IndexDocumentRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    respond(
        state
            .context
            .index_document(&index_name, request.document, request.id)
            .await
            .map(|document_id| IndexDocumentResponse {
                index_name,
                document_id,
            }),
    )
}

/// POST /documents/load
pub async fn load_documents_handler(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<LoadRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    respond(
        state
            .context
            .load_documents(
                request.index_name.as_deref(),
                request.source_pattern.as_deref(),
            )
            .await,
    )
}

/// GET /mapping/example
pub async fn mapping_example_handler(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(state.context.example_mapping())
}

/// POST /keywords/extract
pub async fn extract_keywords_handler(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<KeywordRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    respond(state.context.extract_keywords(&request.user_input).await)
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<ApiState>>) -> Response {
    let health = state.context.health().await;
    let status = StatusCode::from_u16(health.status.to_status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(health)).into_response()
}

/// GET /metrics
pub async fn metrics_handler() -> Response {
    let metrics = get_metrics();
    metrics.update_uptime();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.export_prometheus(),
    )
        .into_response()
}
