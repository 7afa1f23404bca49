//! Cross-encoder reranking of fused candidates.
//!
//! A `Reranker` scores one `(query, candidate_text)` pair at a time. The
//! `RerankStage` fans those calls out with a concurrency bound, isolates
//! per-candidate failures and reorders the survivors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{RerankerConfig, RerankerProviderType};
use crate::error::{HybridError, RerankError, Result};
use crate::storage::SourceFields;

use super::fusion::FusedCandidate;
use super::retry::with_timeout_retry;

/// Trait for query/document relevance scoring.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Relevance of `candidate_text` to `query`; higher is more relevant.
    async fn score(&self, query: &str, candidate_text: &str) -> Result<f32>;

    /// Get the name of this reranker.
    fn name(&self) -> &str;
}

/// A candidate after cross-encoder scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankedResult {
    pub document_id: String,
    pub rerank_score: f32,
    /// Fusion score kept for traceability.
    pub fused_score: f32,
    pub bm25_score_norm: Option<f32>,
    pub vector_score_norm: Option<f32>,
    pub source_fields: SourceFields,
}

/// A candidate that could not be scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankFailure {
    pub document_id: String,
    pub message: String,
}

/// Scored results plus the candidates that were dropped.
#[derive(Debug, Clone, Default)]
pub struct RerankOutcome {
    pub results: Vec<RerankedResult>,
    pub failures: Vec<RerankFailure>,
}

fn field_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(field_as_text)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

/// Text handed to the cross-encoder for one candidate.
///
/// The configured fields are joined with spaces in order; when none of them
/// is present every string field of the document is used, in key order.
pub fn candidate_text(source: &SourceFields, fields: &[String]) -> String {
    let selected: Vec<String> = fields
        .iter()
        .filter_map(|f| source.get(f).and_then(field_as_text))
        .collect();

    if !selected.is_empty() {
        return selected.join(" ");
    }

    let mut keys: Vec<&String> = source.keys().collect();
    keys.sort();
    keys.into_iter()
        .filter_map(|k| match &source[k] {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reranking stage with bounded fan-out and per-call timeout.
pub struct RerankStage {
    reranker: Arc<dyn Reranker>,
    fields: Vec<String>,
    concurrency: usize,
    timeout: Duration,
    retries: u32,
}

impl RerankStage {
    pub fn new(reranker: Arc<dyn Reranker>, fields: Vec<String>) -> Self {
        Self {
            reranker,
            fields,
            concurrency: 4,
            timeout: Duration::from_secs(10),
            retries: 1,
        }
    }

    /// Build from reranker settings and the configured text fields.
    pub fn from_config(
        reranker: Arc<dyn Reranker>,
        fields: Vec<String>,
        config: &RerankerConfig,
    ) -> Self {
        Self::new(reranker, fields)
            .concurrency(config.concurrency)
            .timeout(Duration::from_millis(config.timeout_ms))
            .retries(config.retries)
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn reranker_name(&self) -> &str {
        self.reranker.name()
    }

    async fn score_candidate(&self, query_text: &str, candidate: &FusedCandidate) -> Result<f32> {
        let text = candidate_text(&candidate.source_fields, &self.fields);
        with_timeout_retry(
            "rerank",
            self.timeout,
            self.retries,
            |ms| RerankError::Timeout(ms).into(),
            || self.reranker.score(query_text, &text),
        )
        .await
    }

    /// Score every candidate and keep the best `rerank_top_k`.
    ///
    /// Order is rerank score descending, then fused score descending, then
    /// document id ascending. Individual failures are dropped and reported in
    /// the outcome. Fails with `RerankError::Unavailable` only when every call
    /// failed.
    pub async fn rerank(
        &self,
        query_text: &str,
        candidates: Vec<FusedCandidate>,
        rerank_top_k: usize,
    ) -> Result<RerankOutcome> {
        if candidates.is_empty() {
            return Ok(RerankOutcome::default());
        }
        let total = candidates.len();

        let scored: Vec<(FusedCandidate, Result<f32>)> = stream::iter(candidates)
            .map(|candidate| async move {
                let score = self.score_candidate(query_text, &candidate).await;
                (candidate, score)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut outcome = RerankOutcome::default();
        for (candidate, score) in scored {
            match score {
                Ok(rerank_score) => outcome.results.push(RerankedResult {
                    document_id: candidate.document_id,
                    rerank_score,
                    fused_score: candidate.fused_score,
                    bm25_score_norm: candidate.bm25_score_norm,
                    vector_score_norm: candidate.vector_score_norm,
                    source_fields: candidate.source_fields,
                }),
                Err(e) => {
                    tracing::warn!(
                        document_id = %candidate.document_id,
                        "Dropping candidate after rerank failure: {}",
                        e
                    );
                    outcome.failures.push(RerankFailure {
                        document_id: candidate.document_id,
                        message: e.to_string(),
                    });
                }
            }
        }

        if outcome.results.is_empty() {
            return Err(RerankError::Unavailable { failed: total }.into());
        }

        outcome.results.sort_by(|a, b| {
            b.rerank_score
                .total_cmp(&a.rerank_score)
                .then_with(|| b.fused_score.total_cmp(&a.fused_score))
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        outcome.results.truncate(rerank_top_k);
        outcome
            .failures
            .sort_by(|a, b| a.document_id.cmp(&b.document_id));

        Ok(outcome)
    }
}

/// Cross-encoder served over HTTP.
///
/// Sends `{model, query, documents}` to a rerank endpoint. Accepts the
/// `{"results": [{index, relevance_score}]}`, `{"scores": [...]}` and
/// `[{index, score}]` response shapes used by common model servers.
pub struct CrossEncoderReranker {
    api_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl CrossEncoderReranker {
    pub fn from_config(config: &RerankerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()
            .map_err(|e| RerankError::Api(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_url: config.api.url.clone(),
            api_key: config.api.api_key.clone(),
            model: config.api.model.clone(),
            client,
        })
    }
}

#[derive(Serialize)]
struct CrossEncoderRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
}

#[derive(Deserialize)]
struct IndexedScore {
    index: usize,
    #[serde(alias = "relevance_score")]
    score: f32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CrossEncoderResponse {
    Results { results: Vec<IndexedScore> },
    Scores { scores: Vec<f32> },
    Indexed(Vec<IndexedScore>),
}

impl CrossEncoderResponse {
    /// Score of the document at `index` in the request.
    fn score_at(&self, index: usize) -> Option<f32> {
        match self {
            CrossEncoderResponse::Scores { scores } => scores.get(index).copied(),
            CrossEncoderResponse::Results { results: items }
            | CrossEncoderResponse::Indexed(items) => {
                items.iter().find(|s| s.index == index).map(|s| s.score)
            }
        }
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    async fn score(&self, query: &str, candidate_text: &str) -> Result<f32> {
        let request = CrossEncoderRequest {
            model: &self.model,
            query,
            documents: vec![candidate_text],
        };

        let mut req_builder = self.client.post(&self.api_url).json(&request);
        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.bearer_auth(api_key);
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| RerankError::Api(format!("Cross-encoder API error: {}", e)))?;

        if !response.status().is_success() {
            return Err(RerankError::Api(format!(
                "Cross-encoder API returned status: {}",
                response.status()
            ))
            .into());
        }

        let body: CrossEncoderResponse = response
            .json()
            .await
            .map_err(|e| RerankError::Api(format!("Failed to parse response: {}", e)))?;

        body.score_at(0)
            .filter(|s| s.is_finite())
            .ok_or_else(|| HybridError::from(RerankError::Api("No score in response".to_string())))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Create the configured reranker.
pub fn create_reranker(config: &RerankerConfig) -> Result<Arc<dyn Reranker>> {
    match config.provider {
        RerankerProviderType::Api => {
            tracing::info!("Using cross-encoder API at {}", config.api.url);
            Ok(Arc::new(CrossEncoderReranker::from_config(config)?))
        }
        #[cfg(feature = "local-models")]
        RerankerProviderType::Local => {
            let reranker = super::cross_encoder::LocalCrossEncoder::from_config(config)?;
            Ok(Arc::new(reranker))
        }
        #[cfg(not(feature = "local-models"))]
        RerankerProviderType::Local => Err(crate::error::ConfigError::Invalid(
            "reranker.provider = \"local\" requires the local-models feature".to_string(),
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores by document title; titles listed in `failing` always error.
    struct ScriptedReranker {
        scores: HashMap<String, f32>,
        failing: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedReranker {
        fn new(scores: &[(&str, f32)], failing: &[&str]) -> Self {
            Self {
                scores: scores.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Reranker for ScriptedReranker {
        async fn score(&self, _query: &str, candidate_text: &str) -> Result<f32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.iter().any(|f| f == candidate_text) {
                return Err(RerankError::Api("model crashed".to_string()).into());
            }
            Ok(self.scores.get(candidate_text).copied().unwrap_or(0.0))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn candidate(id: &str, fused_score: f32) -> FusedCandidate {
        let mut source_fields = SourceFields::new();
        source_fields.insert("문서명".to_string(), json!(id));
        FusedCandidate {
            document_id: id.to_string(),
            bm25_score_norm: None,
            vector_score_norm: Some(fused_score),
            fused_score,
            source_fields,
        }
    }

    fn stage(reranker: Arc<ScriptedReranker>) -> RerankStage {
        RerankStage::new(reranker, vec!["문서명".to_string()]).concurrency(2)
    }

    #[test]
    fn test_candidate_text_field_order() {
        let source = json!({
            "문서내용": "제조 시설은 ...",
            "문서명": "품질관리규정",
            "장": "제2장",
            "조": "",
            "content_vector": [0.1, 0.2]
        });
        let source = source.as_object().unwrap();
        let fields = ["문서명", "장", "조", "문서내용"].map(String::from);
        assert_eq!(
            candidate_text(source, &fields),
            "품질관리규정 제2장 제조 시설은 ..."
        );
    }

    #[test]
    fn test_candidate_text_falls_back_to_all_strings() {
        let source = json!({ "body": "b", "title": "t", "n": 3 });
        let text = candidate_text(source.as_object().unwrap(), &["문서내용".to_string()]);
        assert_eq!(text, "b t");
    }

    #[tokio::test]
    async fn test_rerank_orders_by_score() {
        let reranker = Arc::new(ScriptedReranker::new(&[("a", 0.1), ("b", 0.9), ("c", 0.5)], &[]));
        let outcome = stage(reranker.clone())
            .rerank("q", vec![candidate("a", 0.9), candidate("b", 0.5), candidate("c", 0.4)], 2)
            .await
            .unwrap();

        let ids: Vec<&str> = outcome.results.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(outcome.results[0].fused_score, 0.5);
        assert_eq!(reranker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rerank_ties_use_fused_then_id() {
        let reranker = Arc::new(ScriptedReranker::new(&[], &[]));
        let outcome = stage(reranker)
            .rerank(
                "q",
                vec![candidate("c", 0.2), candidate("b", 0.7), candidate("a", 0.2)],
                3,
            )
            .await
            .unwrap();

        let ids: Vec<&str> = outcome.results.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_single_failure_is_isolated() {
        let reranker = Arc::new(ScriptedReranker::new(&[("a", 0.3), ("c", 0.8)], &["b"]));
        let outcome = stage(reranker.clone())
            .rerank("q", vec![candidate("a", 0.9), candidate("b", 0.5), candidate("c", 0.4)], 3)
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].document_id, "b");
        // one retry for the failing candidate
        assert_eq!(reranker.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_all_failures_are_unavailable() {
        let reranker = Arc::new(ScriptedReranker::new(&[], &["a", "b"]));
        let err = stage(reranker)
            .rerank("q", vec![candidate("a", 0.9), candidate("b", 0.5)], 3)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HybridError::Rerank(RerankError::Unavailable { failed: 2 })
        ));
    }

    #[tokio::test]
    async fn test_empty_candidates() {
        let reranker = Arc::new(ScriptedReranker::new(&[], &[]));
        let outcome = stage(reranker.clone()).rerank("q", Vec::new(), 3).await.unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(reranker.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_response_shapes() {
        let tei: CrossEncoderResponse =
            serde_json::from_value(json!([{ "index": 0, "score": 0.42 }])).unwrap();
        assert_eq!(tei.score_at(0), Some(0.42));

        let cohere: CrossEncoderResponse = serde_json::from_value(
            json!({ "results": [{ "index": 0, "relevance_score": 0.7 }] }),
        )
        .unwrap();
        assert_eq!(cohere.score_at(0), Some(0.7));

        let plain: CrossEncoderResponse =
            serde_json::from_value(json!({ "scores": [0.1] })).unwrap();
        assert_eq!(plain.score_at(0), Some(0.1));
        assert_eq!(plain.score_at(1), None);
    }

    #[test]
    fn test_create_api_reranker() {
        let reranker = create_reranker(&RerankerConfig::default()).unwrap();
        assert_eq!(reranker.name(), RerankerConfig::default().api.model);
    }

    #[tokio::test]
    #[ignore] // Requires a running rerank server
    async fn test_cross_encoder_api() {
        let reranker = CrossEncoderReranker::from_config(&RerankerConfig::default()).unwrap();
        let score = reranker
            .score("의약품 제조 규정", "품질관리규정 제2장 의약품 제조 시설 기준")
            .await
            .unwrap();
        assert!(score.is_finite());
    }
}
