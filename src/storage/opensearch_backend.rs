//! OpenSearch backend over the cluster REST API.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::OpenSearchConfig;
use crate::error::{BackendError, Result};
use crate::search::{LexicalRequest, VectorRequest};

use super::{
    BulkItemError, BulkReport, ClusterHealth, IndexCreated, IndexDocument, IndexStats,
    RetrievalHit, SearchBackend, ShardInfo, SourceFields,
};

/// Search backend talking to an OpenSearch cluster.
pub struct OpenSearchBackend {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source", default)]
    source: SourceFields,
}

impl From<Hit> for RetrievalHit {
    fn from(hit: Hit) -> Self {
        RetrievalHit {
            document_id: hit.id,
            raw_score: hit.score.unwrap_or(0.0),
            source_fields: hit.source,
        }
    }
}

/// Extract `(type, reason)` from an OpenSearch error body.
fn error_details(body: &Value) -> (String, String) {
    match &body["error"] {
        Value::Object(err) => (
            err.get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            err.get("reason")
                .and_then(Value::as_str)
                .unwrap_or("no reason given")
                .to_string(),
        ),
        Value::String(reason) => ("unknown".to_string(), reason.clone()),
        _ => ("unknown".to_string(), body.to_string()),
    }
}

fn classify_error(index: Option<&str>, status: StatusCode, body: &Value) -> BackendError {
    let (error_type, reason) = error_details(body);

    if error_type == "index_not_found_exception" {
        return BackendError::IndexNotFound(index.unwrap_or("unknown").to_string());
    }
    if status.is_client_error() {
        BackendError::Rejected {
            status: status.as_u16(),
            reason: format!("{}: {}", error_type, reason),
        }
    } else {
        BackendError::Server {
            status: status.as_u16(),
            reason: format!("{}: {}", error_type, reason),
        }
    }
}

/// Parse the `items` array of a bulk response.
fn parse_bulk_response(body: &Value) -> BulkReport {
    let mut report = BulkReport::default();
    let items = body["items"].as_array().cloned().unwrap_or_default();

    for (position, item) in items.iter().enumerate() {
        // each item is keyed by its action name ("index", "create", ...)
        let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
            continue;
        };
        let document_id = result["_id"].as_str().map(str::to_string);
        let status = result["status"].as_u64().unwrap_or(0);

        if result.get("error").is_some() || !(200..300).contains(&status) {
            let (error_type, reason) = error_details(result);
            report.errors.push(BulkItemError {
                position,
                document_id,
                reason: format!("{}: {}", error_type, reason),
            });
        } else {
            report.indexed_count += 1;
        }
    }

    report
}

impl OpenSearchBackend {
    /// Create a backend from configuration. No request is made until first use.
    pub fn from_config(config: &OpenSearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| BackendError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.client.request(method, url);
        match (&self.username, &self.password) {
            (Some(user), password) => builder.basic_auth(user, password.as_ref()),
            _ => builder,
        }
    }

    /// Send a request and decode the JSON body, mapping failures to [`BackendError`].
    async fn send(&self, builder: RequestBuilder, index: Option<&str>) -> Result<Value> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(self.timeout_secs * 1000)
            } else {
                BackendError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Response(format!("Invalid JSON ({}): {}", status, e)))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_error(index, status, &body).into())
        }
    }

    async fn search(&self, index: &str, body: Value) -> Result<Vec<RetrievalHit>> {
        let path = format!("{}/_search", index);
        let value = self
            .send(self.request(Method::POST, &path).json(&body), Some(index))
            .await?;

        let response: SearchResponse = serde_json::from_value(value)
            .map_err(|e| BackendError::Response(format!("Unexpected search response: {}", e)))?;

        Ok(response.hits.hits.into_iter().map(RetrievalHit::from).collect())
    }

    fn refresh_param(refresh: bool) -> &'static str {
        if refresh {
            "true"
        } else {
            "false"
        }
    }
}

#[async_trait]
impl SearchBackend for OpenSearchBackend {
    async fn lexical_search(&self, request: &LexicalRequest) -> Result<Vec<RetrievalHit>> {
        let hits = self.search(&request.index, request.to_query_body()).await?;
        tracing::debug!(index = %request.index, hits = hits.len(), "Lexical query complete");
        Ok(hits)
    }

    async fn vector_search(&self, request: &VectorRequest) -> Result<Vec<RetrievalHit>> {
        let hits = self.search(&request.index, request.to_query_body()).await?;
        tracing::debug!(index = %request.index, hits = hits.len(), "k-NN query complete");
        Ok(hits)
    }

    async fn create_index(&self, name: &str, mapping: &Value) -> Result<IndexCreated> {
        let result = self
            .send(self.request(Method::PUT, name).json(mapping), Some(name))
            .await;

        match result {
            Ok(body) => {
                tracing::info!("Created OpenSearch index: {}", name);
                Ok(IndexCreated {
                    index_name: name.to_string(),
                    acknowledged: body["acknowledged"].as_bool().unwrap_or(false),
                    already_exists: false,
                })
            }
            Err(crate::error::HybridError::Backend(BackendError::Rejected { reason, .. }))
                if reason.starts_with("resource_already_exists_exception") =>
            {
                tracing::info!("OpenSearch index already exists: {}", name);
                Ok(IndexCreated {
                    index_name: name.to_string(),
                    acknowledged: false,
                    already_exists: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, name), Some(name))
            .await?;
        tracing::info!("Deleted OpenSearch index: {}", name);
        Ok(())
    }

    async fn index_stats(&self, name: &str) -> Result<IndexStats> {
        let path = format!("{}/_stats", name);
        let body = self
            .send(self.request(Method::GET, &path), Some(name))
            .await?;

        let all = &body["_all"];
        Ok(IndexStats {
            index_name: name.to_string(),
            doc_count: all["primaries"]["docs"]["count"].as_u64().unwrap_or(0),
            size_bytes: all["total"]["store"]["size_in_bytes"]
                .as_u64()
                .unwrap_or(0),
            shard_info: ShardInfo {
                total: body["_shards"]["total"].as_u64().unwrap_or(0),
                successful: body["_shards"]["successful"].as_u64().unwrap_or(0),
                failed: body["_shards"]["failed"].as_u64().unwrap_or(0),
            },
        })
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<IndexDocument>,
        refresh: bool,
    ) -> Result<BulkReport> {
        if documents.is_empty() {
            return Ok(BulkReport::default());
        }

        let mut body = String::new();
        for document in &documents {
            let action = match &document.id {
                Some(id) => json!({ "index": { "_index": index, "_id": id } }),
                None => json!({ "index": { "_index": index } }),
            };
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&serde_json::to_string(&document.source)?);
            body.push('\n');
        }

        let path = format!("_bulk?refresh={}", Self::refresh_param(refresh));
        let response = self
            .send(
                self.request(Method::POST, &path)
                    .header("Content-Type", "application/x-ndjson")
                    .body(body),
                Some(index),
            )
            .await?;

        let report = parse_bulk_response(&response);
        tracing::debug!(
            index,
            submitted = documents.len(),
            indexed = report.indexed_count,
            failed = report.errors.len(),
            "Bulk request complete"
        );
        Ok(report)
    }

    async fn index_document(
        &self,
        index: &str,
        document: IndexDocument,
        refresh: bool,
    ) -> Result<String> {
        let refresh = Self::refresh_param(refresh);
        let builder = match &document.id {
            Some(id) => self.request(
                Method::PUT,
                &format!("{}/_doc/{}?refresh={}", index, id, refresh),
            ),
            None => self.request(Method::POST, &format!("{}/_doc?refresh={}", index, refresh)),
        };

        let body = self
            .send(builder.json(&document.source), Some(index))
            .await?;

        body["_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Response("Index response without _id".to_string()).into())
    }

    async fn health(&self) -> Result<ClusterHealth> {
        let body = self
            .send(self.request(Method::GET, "_cluster/health"), None)
            .await?;

        Ok(ClusterHealth {
            cluster_name: body["cluster_name"].as_str().unwrap_or_default().to_string(),
            status: body["status"].as_str().unwrap_or("unknown").to_string(),
            number_of_nodes: body["number_of_nodes"].as_u64().unwrap_or(0),
        })
    }

    fn name(&self) -> &str {
        "opensearch"
    }
}
