//! End-to-end search tests over the in-memory backend.

use std::sync::Arc;

use hybrid_retrieval::error::ErrorKind;
use hybrid_retrieval::search::{RerankStatus, SearchRequest, Stage};
use hybrid_retrieval::storage::MemoryBackend;

use crate::common::{context_with, seeded_backend, DownReranker, OverlapReranker};

fn regulation_query() -> SearchRequest {
    SearchRequest::new("의약품 제조 규정")
        .keywords(["규정", "준수"])
        .top_k(5)
        .rerank_top_k(3)
}

#[tokio::test]
async fn test_reranked_search_returns_rerank_order() {
    let ctx = context_with(seeded_backend().await, Arc::new(OverlapReranker));
    let response = ctx.search(regulation_query()).await.unwrap();

    let d = &response.diagnostics;
    assert_eq!(d.lexical_hits, 3);
    assert_eq!(d.vector_hits, 5);
    assert_eq!(d.fused_candidates, 5);
    assert_eq!(d.reranked, 3);
    assert_eq!(d.rerank, RerankStatus::Applied);
    assert_eq!(
        d.stages,
        vec![Stage::Built, Stage::Retrieved, Stage::Fused, Stage::Reranked, Stage::Done]
    );

    let ids: Vec<&str> = response.results.iter().map(|r| r.document_id.as_str()).collect();
    // quality and security tie on overlap; fused score decides
    assert_eq!(ids, vec!["manufacturing", "quality", "security"]);

    let scores: Vec<f32> = response
        .results
        .iter()
        .map(|r| r.rerank_score.unwrap())
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert!(response
        .results
        .iter()
        .all(|r| !r.source_fields.contains_key("content_vector")));
}

#[tokio::test]
async fn test_vector_only_document_survives_fusion() {
    let ctx = context_with(seeded_backend().await, Arc::new(OverlapReranker));
    let response = ctx
        .search(regulation_query().use_rerank(false).rerank_top_k(5))
        .await
        .unwrap();

    assert_eq!(response.diagnostics.rerank, RerankStatus::Skipped);
    let ids: Vec<&str> = response.results.iter().map(|r| r.document_id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["manufacturing", "quality", "security", "travel", "personnel"]
    );

    let quality = &response.results[1];
    assert_eq!(quality.bm25_score_norm, None);
    assert_eq!(quality.vector_score_norm, Some(1.0));
    assert!((quality.fused_score - 0.7).abs() < 1e-5);
    assert!(response.results.iter().all(|r| r.rerank_score.is_none()));
}

#[tokio::test]
async fn test_lexical_only_weights_break_ties_by_id() {
    let ctx = context_with(seeded_backend().await, Arc::new(OverlapReranker));
    let response = ctx
        .search(
            regulation_query()
                .weights(1.0, 0.0)
                .use_rerank(false)
                .rerank_top_k(5),
        )
        .await
        .unwrap();

    let ids: Vec<&str> = response.results.iter().map(|r| r.document_id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["manufacturing", "security", "personnel", "quality", "travel"]
    );
    assert_eq!(response.results[0].fused_score, 1.0);
    assert_eq!(response.results[1].fused_score, 1.0);
}

#[tokio::test]
async fn test_reranker_outage_returns_fused_order() {
    let ctx = context_with(seeded_backend().await, Arc::new(DownReranker));
    let response = ctx.search(regulation_query()).await.unwrap();

    let d = &response.diagnostics;
    assert_eq!(d.rerank, RerankStatus::Fallback);
    assert_eq!(d.rerank_failures, 5);
    assert_eq!(d.warnings.len(), 1);
    assert_eq!(d.warnings[0].kind, ErrorKind::RerankingUnavailable);

    let ids: Vec<&str> = response.results.iter().map(|r| r.document_id.as_str()).collect();
    assert_eq!(ids, vec!["manufacturing", "quality", "security"]);
    assert!(response.results.iter().all(|r| r.rerank_score.is_none()));
}

#[tokio::test]
async fn test_out_of_range_weight_is_invalid_query() {
    let ctx = context_with(seeded_backend().await, Arc::new(OverlapReranker));
    let err = ctx
        .search(regulation_query().weights(1.5, 0.7))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
}

#[tokio::test]
async fn test_missing_index_surfaces_not_found() {
    let ctx = context_with(Arc::new(MemoryBackend::new()), Arc::new(OverlapReranker));
    let err = ctx.search(regulation_query()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_explicit_index_overrides_default() {
    let ctx = context_with(seeded_backend().await, Arc::new(OverlapReranker));
    let err = ctx
        .search(regulation_query().index("other_index"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
