//! Search request validation and retrieval request construction.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::config::SearchConfig;
use crate::error::{HybridError, Result};
use crate::storage::SourceFields;

use super::fusion::FusedCandidate;

pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_BM25_WEIGHT: f32 = 0.3;
pub const DEFAULT_VECTOR_WEIGHT: f32 = 0.7;
pub const DEFAULT_USE_RERANK: bool = true;
pub const DEFAULT_RERANK_TOP_K: usize = 3;
pub const MAX_TOP_K: usize = 50;
pub const MAX_RERANK_TOP_K: usize = 10;

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_bm25_weight() -> f32 {
    DEFAULT_BM25_WEIGHT
}

fn default_vector_weight() -> f32 {
    DEFAULT_VECTOR_WEIGHT
}

fn default_use_rerank() -> bool {
    DEFAULT_USE_RERANK
}

fn default_rerank_top_k() -> usize {
    DEFAULT_RERANK_TOP_K
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Accept `"keywords": "규정"` as well as `"keywords": ["규정", "준수"]`.
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(keyword)) => vec![keyword],
        Some(OneOrMany::Many(keywords)) => keywords,
    })
}

/// Search request as received from callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default, deserialize_with = "one_or_many")]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub query_text: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f32,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_use_rerank")]
    pub use_rerank: bool,
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,
    /// Target index; the configured default index when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
}

impl SearchRequest {
    /// Create a request with default parameters.
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            keywords: Vec::new(),
            query_text: query_text.into(),
            top_k: DEFAULT_TOP_K,
            bm25_weight: DEFAULT_BM25_WEIGHT,
            vector_weight: DEFAULT_VECTOR_WEIGHT,
            use_rerank: DEFAULT_USE_RERANK,
            rerank_top_k: DEFAULT_RERANK_TOP_K,
            index_name: None,
        }
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn weights(mut self, bm25_weight: f32, vector_weight: f32) -> Self {
        self.bm25_weight = bm25_weight;
        self.vector_weight = vector_weight;
        self
    }

    pub fn use_rerank(mut self, use_rerank: bool) -> Self {
        self.use_rerank = use_rerank;
        self
    }

    pub fn rerank_top_k(mut self, rerank_top_k: usize) -> Self {
        self.rerank_top_k = rerank_top_k;
        self
    }

    pub fn index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    /// Check all request invariants and produce a [`Query`].
    pub fn validate(self, default_index: &str) -> Result<Query> {
        for (name, value, max) in [
            ("top_k", self.top_k, MAX_TOP_K),
            ("rerank_top_k", self.rerank_top_k, MAX_RERANK_TOP_K),
        ] {
            if !(1..=max).contains(&value) {
                return Err(HybridError::invalid_query(format!(
                    "{} must be within [1, {}], got {}",
                    name, max, value
                )));
            }
        }
        if self.rerank_top_k > self.top_k {
            return Err(HybridError::invalid_query(format!(
                "rerank_top_k ({}) must not exceed top_k ({})",
                self.rerank_top_k, self.top_k
            )));
        }
        for (name, weight) in [
            ("bm25_weight", self.bm25_weight),
            ("vector_weight", self.vector_weight),
        ] {
            if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
                return Err(HybridError::invalid_query(format!(
                    "{} must be within [0, 1], got {}",
                    name, weight
                )));
            }
        }

        let query_text = self.query_text.trim().to_string();
        if query_text.is_empty() {
            return Err(HybridError::invalid_query(
                "query_text must not be empty for vector retrieval",
            ));
        }

        let mut keywords: Vec<String> = Vec::with_capacity(self.keywords.len());
        for keyword in self.keywords {
            let keyword = keyword.trim();
            if !keyword.is_empty() && !keywords.iter().any(|k| k == keyword) {
                keywords.push(keyword.to_string());
            }
        }

        let index = match self.index_name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => default_index.to_string(),
        };

        Ok(Query {
            index,
            keywords,
            query_text,
            top_k: self.top_k,
            bm25_weight: self.bm25_weight,
            vector_weight: self.vector_weight,
            use_rerank: self.use_rerank,
            rerank_top_k: self.rerank_top_k,
        })
    }
}

/// A validated, request-scoped query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub index: String,
    /// Trimmed, de-duplicated keywords (may be empty).
    pub keywords: Vec<String>,
    pub query_text: String,
    pub top_k: usize,
    pub bm25_weight: f32,
    pub vector_weight: f32,
    pub use_rerank: bool,
    pub rerank_top_k: usize,
}

/// A caller-supplied document to rerank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankDocument {
    /// Position in the request when absent.
    #[serde(default, alias = "_id", alias = "id")]
    pub document_id: Option<String>,
    /// Breaks rerank ties; 0 when absent.
    #[serde(default)]
    pub fused_score: f32,
    #[serde(default, alias = "source", alias = "_source")]
    pub source_fields: SourceFields,
}

/// Rerank request for documents the caller already holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankRequest {
    #[serde(default)]
    pub query_text: String,
    #[serde(default)]
    pub documents: Vec<RerankDocument>,
    #[serde(default = "default_rerank_top_k")]
    pub top_k: usize,
}

impl RerankRequest {
    pub fn new(query_text: impl Into<String>, documents: Vec<RerankDocument>) -> Self {
        Self {
            query_text: query_text.into(),
            documents,
            top_k: DEFAULT_RERANK_TOP_K,
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Produce a query whose `rerank_top_k` is the requested `top_k`, and the
    /// documents as candidates in the order given.
    pub fn validate(self, default_index: &str) -> Result<(Query, Vec<FusedCandidate>)> {
        if !(1..=MAX_RERANK_TOP_K).contains(&self.top_k) {
            return Err(HybridError::invalid_query(format!(
                "top_k must be within [1, {}], got {}",
                MAX_RERANK_TOP_K, self.top_k
            )));
        }
        if self.documents.len() > MAX_TOP_K {
            return Err(HybridError::invalid_query(format!(
                "at most {} documents can be reranked, got {}",
                MAX_TOP_K,
                self.documents.len()
            )));
        }
        let query_text = self.query_text.trim().to_string();
        if query_text.is_empty() {
            return Err(HybridError::invalid_query("query_text must not be empty"));
        }

        let candidates: Vec<FusedCandidate> = self
            .documents
            .into_iter()
            .enumerate()
            .map(|(position, document)| FusedCandidate {
                document_id: document
                    .document_id
                    .unwrap_or_else(|| position.to_string()),
                bm25_score_norm: None,
                vector_score_norm: None,
                fused_score: document.fused_score,
                source_fields: document.source_fields,
            })
            .collect();

        let query = Query {
            index: default_index.to_string(),
            keywords: Vec::new(),
            query_text,
            top_k: candidates.len(),
            bm25_weight: DEFAULT_BM25_WEIGHT,
            vector_weight: DEFAULT_VECTOR_WEIGHT,
            use_rerank: true,
            rerank_top_k: self.top_k,
        };
        Ok((query, candidates))
    }
}

/// Lexical (BM25) retrieval request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalRequest {
    pub index: String,
    /// Terms OR-ed together; a hit needs at least one match.
    pub keywords: Vec<String>,
    /// Field names with optional `^boost` suffix.
    pub fields: Vec<String>,
    pub fuzziness: String,
    pub size: usize,
    pub excluded_fields: Vec<String>,
}

impl LexicalRequest {
    /// Render the OpenSearch query DSL body.
    pub fn to_query_body(&self) -> Value {
        let should: Vec<Value> = self
            .keywords
            .iter()
            .map(|keyword| {
                json!({
                    "multi_match": {
                        "query": keyword,
                        "fields": self.fields,
                        "type": "best_fields",
                        "fuzziness": self.fuzziness,
                    }
                })
            })
            .collect();

        json!({
            "size": self.size,
            "query": {
                "bool": {
                    "should": should,
                    "minimum_should_match": 1,
                }
            },
            "_source": { "excludes": self.excluded_fields },
        })
    }
}

/// Approximate k-NN retrieval request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRequest {
    pub index: String,
    pub field: String,
    pub vector: Vec<f32>,
    pub k: usize,
    pub excluded_fields: Vec<String>,
}

impl VectorRequest {
    /// Render the OpenSearch query DSL body.
    pub fn to_query_body(&self) -> Value {
        let mut knn = serde_json::Map::new();
        knn.insert(
            self.field.clone(),
            json!({ "vector": self.vector, "k": self.k }),
        );

        json!({
            "size": self.k,
            "query": { "knn": knn },
            "_source": { "excludes": self.excluded_fields },
        })
    }
}

/// Split `"문서내용^2"` into its field name and boost (1.0 when absent).
pub fn parse_field_boost(field: &str) -> (&str, f32) {
    match field.split_once('^') {
        Some((name, boost)) => (name, boost.parse().unwrap_or(1.0)),
        None => (field, 1.0),
    }
}

/// Builds the two independent retrieval requests for a query.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    lexical_fields: Vec<String>,
    vector_field: String,
    excluded_fields: Vec<String>,
    fetch_multiplier: usize,
    fuzziness: String,
}

impl QueryBuilder {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            lexical_fields: config.lexical_fields.clone(),
            vector_field: config.vector_field.clone(),
            excluded_fields: config.excluded_source_fields.clone(),
            fetch_multiplier: config.fetch_multiplier.max(1),
            fuzziness: config.fuzziness.clone(),
        }
    }

    /// Candidates requested from each stream before fusion.
    pub fn candidate_depth(&self, query: &Query) -> usize {
        query
            .top_k
            .max(query.rerank_top_k)
            .saturating_mul(self.fetch_multiplier)
    }

    /// Lexical request; without keywords the query text itself is matched.
    pub fn lexical_request(&self, query: &Query) -> LexicalRequest {
        let keywords = if query.keywords.is_empty() {
            vec![query.query_text.clone()]
        } else {
            query.keywords.clone()
        };

        LexicalRequest {
            index: query.index.clone(),
            keywords,
            fields: self.lexical_fields.clone(),
            fuzziness: self.fuzziness.clone(),
            size: self.candidate_depth(query),
            excluded_fields: self.excluded_fields.clone(),
        }
    }

    /// k-NN request for an already embedded query text.
    pub fn vector_request(&self, query: &Query, vector: Vec<f32>) -> VectorRequest {
        VectorRequest {
            index: query.index.clone(),
            field: self.vector_field.clone(),
            vector,
            k: self.candidate_depth(query),
            excluded_fields: self.excluded_fields.clone(),
        }
    }

    pub fn vector_field(&self) -> &str {
        &self.vector_field
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn builder() -> QueryBuilder {
        QueryBuilder::from_config(&SearchConfig::default())
    }

    #[test]
    fn test_wire_defaults() {
        let request: SearchRequest =
            serde_json::from_str(r#"{"query_text": "의약품 제조 규정"}"#).unwrap();
        assert!(request.keywords.is_empty());
        assert_eq!(request.top_k, 10);
        assert_eq!(request.bm25_weight, 0.3);
        assert_eq!(request.vector_weight, 0.7);
        assert!(request.use_rerank);
        assert_eq!(request.rerank_top_k, 3);
    }

    #[test]
    fn test_keywords_accept_single_string() {
        let request: SearchRequest =
            serde_json::from_str(r#"{"keywords": "규정", "query_text": "q"}"#).unwrap();
        assert_eq!(request.keywords, vec!["규정"]);

        let request: SearchRequest =
            serde_json::from_str(r#"{"keywords": null, "query_text": "q"}"#).unwrap();
        assert!(request.keywords.is_empty());
    }

    #[test]
    fn test_rerank_top_k_exceeding_top_k_rejected() {
        let err = SearchRequest::new("q")
            .top_k(2)
            .rerank_top_k(3)
            .validate("idx")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }

    #[test]
    fn test_empty_query_text_rejected() {
        let err = SearchRequest::new("   ")
            .keywords(["규정"])
            .validate("idx")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }

    #[test]
    fn test_weights_out_of_range_rejected() {
        assert!(SearchRequest::new("q").weights(1.5, 0.5).validate("idx").is_err());
        assert!(SearchRequest::new("q").weights(0.5, -0.1).validate("idx").is_err());
        assert!(SearchRequest::new("q")
            .weights(f32::NAN, 0.5)
            .validate("idx")
            .is_err());
        assert!(SearchRequest::new("q").weights(0.0, 0.0).validate("idx").is_ok());
    }

    #[test]
    fn test_zero_top_k_rejected() {
        assert!(SearchRequest::new("q")
            .top_k(0)
            .rerank_top_k(0)
            .validate("idx")
            .is_err());
    }

    #[test]
    fn test_limits_above_bounds_rejected() {
        let err = SearchRequest::new("q").top_k(51).validate("idx").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);

        let err = SearchRequest::new("q")
            .top_k(50)
            .rerank_top_k(11)
            .validate("idx")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);

        let request: SearchRequest =
            serde_json::from_str(r#"{"query_text": "q", "top_k": 9223372036854775808}"#).unwrap();
        assert!(request.validate("idx").is_err());

        assert!(SearchRequest::new("q")
            .top_k(MAX_TOP_K)
            .rerank_top_k(MAX_RERANK_TOP_K)
            .validate("idx")
            .is_ok());
    }

    #[test]
    fn test_rerank_request_from_wire() {
        let request: RerankRequest = serde_json::from_str(
            r#"{
                "query_text": "출장비 정산",
                "documents": [
                    {"_id": "여비규정_제3조", "source": {"문서명": "여비규정"}},
                    {"source": {"문서명": "회계규정"}, "fused_score": 0.4}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(request.top_k, 3);

        let (query, candidates) = request.validate("idx").unwrap();
        assert_eq!(query.rerank_top_k, 3);
        assert!(query.use_rerank);
        assert_eq!(candidates[0].document_id, "여비규정_제3조");
        assert_eq!(candidates[1].document_id, "1");
        assert_eq!(candidates[1].fused_score, 0.4);
        assert_eq!(candidates[1].source_fields["문서명"], "회계규정");
    }

    #[test]
    fn test_rerank_request_limits() {
        let err = RerankRequest::new("q", Vec::new())
            .top_k(11)
            .validate("idx")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);

        let err = RerankRequest::new(" ", Vec::new()).validate("idx").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);

        let many = (0..=MAX_TOP_K)
            .map(|_| RerankDocument {
                document_id: None,
                fused_score: 0.0,
                source_fields: SourceFields::new(),
            })
            .collect();
        assert!(RerankRequest::new("q", many).validate("idx").is_err());
    }

    #[test]
    fn test_candidate_depth_saturates() {
        let query = Query {
            index: "idx".to_string(),
            keywords: Vec::new(),
            query_text: "q".to_string(),
            top_k: usize::MAX,
            bm25_weight: 0.3,
            vector_weight: 0.7,
            use_rerank: false,
            rerank_top_k: 1,
        };
        assert_eq!(builder().candidate_depth(&query), usize::MAX);
    }

    #[test]
    fn test_keywords_cleaned_and_index_defaulted() {
        let query = SearchRequest::new(" 의약품 제조 규정 ")
            .keywords(["규정", " ", "준수", "규정 "])
            .validate("internal_regulations_index")
            .unwrap();
        assert_eq!(query.keywords, vec!["규정", "준수"]);
        assert_eq!(query.query_text, "의약품 제조 규정");
        assert_eq!(query.index, "internal_regulations_index");

        let query = SearchRequest::new("q").index("other").validate("default").unwrap();
        assert_eq!(query.index, "other");
    }

    #[test]
    fn test_candidate_depth_over_fetches() {
        let query = SearchRequest::new("q").top_k(5).validate("idx").unwrap();
        assert_eq!(builder().candidate_depth(&query), 10);
    }

    #[test]
    fn test_lexical_request_body() {
        let query = SearchRequest::new("의약품 제조 규정")
            .keywords(["규정", "준수"])
            .validate("idx")
            .unwrap();
        let body = builder().lexical_request(&query).to_query_body();

        let should = body["query"]["bool"]["should"].as_array().unwrap();
        assert_eq!(should.len(), 2);
        assert_eq!(should[0]["multi_match"]["query"], "규정");
        assert_eq!(should[1]["multi_match"]["fields"][0], "문서내용^2");
        assert_eq!(body["query"]["bool"]["minimum_should_match"], 1);
        assert_eq!(body["size"], 20);
        assert_eq!(body["_source"]["excludes"][0], "content_vector");
    }

    #[test]
    fn test_lexical_request_falls_back_to_query_text() {
        let query = SearchRequest::new("의약품 제조 규정").validate("idx").unwrap();
        let request = builder().lexical_request(&query);
        assert_eq!(request.keywords, vec!["의약품 제조 규정"]);
    }

    #[test]
    fn test_vector_request_body() {
        let query = SearchRequest::new("q").validate("idx").unwrap();
        let body = builder()
            .vector_request(&query, vec![0.1, 0.2])
            .to_query_body();
        assert_eq!(body["query"]["knn"]["content_vector"]["k"], 20);
        assert_eq!(
            body["query"]["knn"]["content_vector"]["vector"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_parse_field_boost() {
        assert_eq!(parse_field_boost("문서내용^2"), ("문서내용", 2.0));
        assert_eq!(parse_field_boost("조"), ("조", 1.0));
        assert_eq!(parse_field_boost("장^x"), ("장", 1.0));
    }
}
