//! REST API tests driven through the router without a socket.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use hybrid_retrieval::error::Result;
use hybrid_retrieval::search::{parse_keywords, ExtractedKeywords, KeywordExtractor};
use hybrid_retrieval::{create_rest_router, RestApiConfig};

use crate::common::{context_with, seeded_backend, DownReranker, OverlapReranker, INDEX};

async fn router() -> Router {
    let ctx = context_with(seeded_backend().await, Arc::new(OverlapReranker));
    create_rest_router(Arc::new(ctx), &RestApiConfig::default())
}

async fn call(router: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_search_endpoint() {
    let body = json!({
        "keywords": ["규정", "준수"],
        "query_text": "의약품 제조 규정",
        "top_k": 5,
        "bm25_weight": 0.3,
        "vector_weight": 0.7,
        "use_rerank": true,
        "rerank_top_k": 3
    })
    .to_string();

    let (status, value) = call(router().await, "POST", "/api/v1/search", Some(&body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["results"].as_array().unwrap().len(), 3);
    assert_eq!(value["results"][0]["document_id"], "manufacturing");
    assert_eq!(value["diagnostics"]["rerank"], "applied");
    assert_eq!(value["diagnostics"]["stages"][4], "done");
}

#[tokio::test]
async fn test_search_accepts_single_keyword_string() {
    let body = json!({ "keywords": "규정", "query_text": "의약품 제조 규정", "use_rerank": false })
        .to_string();

    let (status, value) = call(router().await, "POST", "/api/v1/search", Some(&body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["diagnostics"]["rerank"], "skipped");
    assert!(value["results"][0]["rerank_score"].is_null());
}

#[tokio::test]
async fn test_blank_query_is_bad_request() {
    let body = json!({ "query_text": "   " }).to_string();

    let (status, value) = call(router().await, "POST", "/api/v1/search", Some(&body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["code"], "invalid_query");
}

#[tokio::test]
async fn test_top_k_above_limit_is_bad_request() {
    let body = json!({ "query_text": "의약품 제조 규정", "top_k": 9223372036854775808u64 })
        .to_string();

    let (status, value) = call(router().await, "POST", "/api/v1/search", Some(&body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["code"], "invalid_query");
}

fn rerank_body() -> String {
    json!({
        "query_text": "출장 경비 정산",
        "documents": [
            { "document_id": "meeting", "source_fields": { "문서내용": "회의실 예약" } },
            { "document_id": "travel", "source_fields": { "문서내용": "출장 경비 정산 절차" } }
        ],
        "top_k": 2
    })
    .to_string()
}

#[tokio::test]
async fn test_rerank_endpoint() {
    let (status, value) = call(router().await, "POST", "/api/v1/rerank", Some(&rerank_body())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["diagnostics"]["rerank"], "applied");
    assert_eq!(value["results"][0]["document_id"], "travel");
    assert_eq!(value["results"][1]["document_id"], "meeting");
    assert!(value["results"][0]["rerank_score"].is_number());
}

#[tokio::test]
async fn test_rerank_endpoint_falls_back_when_reranker_down() {
    let ctx = context_with(seeded_backend().await, Arc::new(DownReranker));
    let router = create_rest_router(Arc::new(ctx), &RestApiConfig::default());

    let (status, value) = call(router, "POST", "/api/v1/rerank", Some(&rerank_body())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["diagnostics"]["rerank"], "fallback");
    assert_eq!(value["diagnostics"]["warnings"][0]["kind"], "reranking_unavailable");
    assert_eq!(value["results"][0]["document_id"], "meeting");
    assert!(value["results"][0]["rerank_score"].is_null());
}

#[tokio::test]
async fn test_malformed_json_is_invalid_query() {
    let (status, value) = call(
        router().await,
        "POST",
        "/api/v1/search",
        Some("{\"query_text\": "),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["code"], "invalid_query");
}

#[tokio::test]
async fn test_delete_missing_index_is_not_found() {
    let (status, value) = call(router().await, "DELETE", "/api/v1/indices/missing_index", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(value["code"], "not_found");
}

#[tokio::test]
async fn test_index_stats() {
    let uri = format!("/api/v1/indices/{}/stats", INDEX);
    let (status, value) = call(router().await, "GET", &uri, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["index_name"], INDEX);
    assert_eq!(value["doc_count"], 5);
}

#[tokio::test]
async fn test_create_index_rejects_dimension_mismatch() {
    let body = json!({
        "index_name": "mismatched_index",
        "mapping": {
            "mappings": {
                "properties": {
                    "content_vector": { "type": "knn_vector", "dimension": 768 }
                }
            }
        }
    })
    .to_string();

    let (status, value) = call(router().await, "POST", "/api/v1/indices", Some(&body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["code"], "invalid_query");
}

#[tokio::test]
async fn test_create_existing_index_is_acknowledged() {
    let body = json!({ "index_name": INDEX }).to_string();

    let (status, value) = call(router().await, "POST", "/api/v1/indices", Some(&body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["already_exists"], true);
}

#[tokio::test]
async fn test_health() {
    let (status, value) = call(router().await, "GET", "/api/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["status"], "healthy");
    assert_eq!(value["embedding_dimension"], 3);
    assert_eq!(value["reranker"], "overlap");
}

#[tokio::test]
async fn test_keywords_without_extractor_is_unavailable() {
    let body = json!({ "user_input": "의약품 제조 규정이 궁금합니다" }).to_string();

    let (status, value) = call(router().await, "POST", "/api/v1/keywords/extract", Some(&body)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(value["code"], "keyword_extraction_unavailable");
}

/// Replies with a canned model answer.
struct CannedExtractor;

#[async_trait]
impl KeywordExtractor for CannedExtractor {
    async fn extract(&self, _user_input: &str) -> Result<ExtractedKeywords> {
        let raw = "키워드: [\"의약품\", \"제조\", \"규정\"]".to_string();
        Ok(ExtractedKeywords {
            keywords: parse_keywords(&raw, 5),
            raw_response: raw,
        })
    }
}

#[tokio::test]
async fn test_keywords_with_extractor() {
    let ctx = context_with(seeded_backend().await, Arc::new(OverlapReranker))
        .with_keyword_extractor(Arc::new(CannedExtractor));
    let router = create_rest_router(Arc::new(ctx), &RestApiConfig::default());
    let body = json!({ "user_input": "의약품 제조 규정이 궁금합니다" }).to_string();

    let (status, value) = call(router, "POST", "/api/v1/keywords/extract", Some(&body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["keywords"], json!(["의약품", "제조", "규정"]));
}
