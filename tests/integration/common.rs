//! Shared fixtures: a keyword-driven embedder, a term-overlap reranker and a
//! small regulation corpus in the in-memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use hybrid_retrieval::config::{BackendType, Config};
use hybrid_retrieval::embedding::EmbeddingProvider;
use hybrid_retrieval::error::{RerankError, Result};
use hybrid_retrieval::search::Reranker;
use hybrid_retrieval::storage::{IndexDocument, IndexSchema, MemoryBackend, SearchBackend};
use hybrid_retrieval::ServiceContext;

pub const INDEX: &str = "internal_regulations_index";

/// Three-dimensional embedder: manufacturing, security, HR.
pub struct TopicEmbedder;

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let axis = |terms: &[&str]| {
                    if terms.iter().any(|term| t.contains(term)) {
                        1.1
                    } else {
                        0.1
                    }
                };
                vec![
                    axis(&["제조", "의약품"]),
                    axis(&["보안"]),
                    axis(&["인사", "출장", "휴가"]),
                ]
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        "topic"
    }
}

/// Scores a candidate by how many query tokens it contains.
pub struct OverlapReranker;

#[async_trait]
impl Reranker for OverlapReranker {
    async fn score(&self, query: &str, candidate_text: &str) -> Result<f32> {
        Ok(query
            .split_whitespace()
            .filter(|token| candidate_text.contains(token))
            .count() as f32)
    }

    fn name(&self) -> &str {
        "overlap"
    }
}

/// Always unavailable.
pub struct DownReranker;

#[async_trait]
impl Reranker for DownReranker {
    async fn score(&self, _query: &str, _candidate_text: &str) -> Result<f32> {
        Err(RerankError::Api("503 Service Unavailable".to_string()).into())
    }

    fn name(&self) -> &str {
        "down"
    }
}

fn document(id: &str, title: &str, article: &str, body: &str, vector: [f32; 3]) -> IndexDocument {
    let source = json!({
        "문서명": title,
        "장": "제1장",
        "조": article,
        "문서내용": body,
        "content_vector": vector,
    });
    IndexDocument {
        id: Some(id.to_string()),
        source: source.as_object().cloned().unwrap(),
    }
}

/// Five regulations; `quality` shares no term with the lexical keywords.
pub async fn seeded_backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .create_index(INDEX, &IndexSchema::new(3).to_mapping())
        .await
        .unwrap();

    let documents = vec![
        document(
            "manufacturing",
            "의약품 제조 관리 규정",
            "제1조",
            "의약품 제조 시설은 본 규정을 준수하여야 한다.",
            [1.0, 0.0, 0.0],
        ),
        document(
            "security",
            "정보 보안 규정",
            "제3조",
            "임직원은 정보 보안 규정 준수 의무를 진다.",
            [0.0, 1.0, 0.0],
        ),
        document(
            "quality",
            "품질 관리 지침",
            "제5조",
            "의약품 품질 검사 절차를 정한다.",
            [0.9, 0.1, 0.0],
        ),
        document(
            "personnel",
            "인사 규정",
            "제7조",
            "휴가 신청 절차를 정한다.",
            [0.0, 0.0, 1.0],
        ),
        document(
            "travel",
            "출장 지침",
            "제9조",
            "출장비 정산 방법을 정한다.",
            [0.0, 0.2, 1.0],
        ),
    ];

    let report = backend.bulk_index(INDEX, documents, true).await.unwrap();
    assert_eq!(report.indexed_count, 5);
    backend
}

pub fn memory_config() -> Config {
    let mut config = Config::default();
    config.opensearch.backend = BackendType::Memory;
    config.embedding.dimension = 3;
    config.opensearch.default_index = INDEX.to_string();
    config
}

pub fn context_with(backend: Arc<MemoryBackend>, reranker: Arc<dyn Reranker>) -> ServiceContext {
    ServiceContext::from_parts(memory_config(), backend, Arc::new(TopicEmbedder), reranker).unwrap()
}
