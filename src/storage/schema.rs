//! Index mapping construction and validation.

use serde_json::{json, Value};

use crate::error::{HybridError, Result};

/// Builder for the regulation index mapping.
///
/// The default layout stores document title and source file as keywords,
/// chapter, article and body as analyzed text, and the body embedding as an
/// HNSW `knn_vector` using cosine similarity on the Lucene engine.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    dimension: usize,
    vector_field: String,
    keyword_fields: Vec<String>,
    text_fields: Vec<String>,
}

impl IndexSchema {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vector_field: "content_vector".to_string(),
            keyword_fields: vec!["문서명".to_string(), "출처파일".to_string()],
            text_fields: vec!["장".to_string(), "조".to_string(), "문서내용".to_string()],
        }
    }

    pub fn with_vector_field(mut self, field: impl Into<String>) -> Self {
        self.vector_field = field.into();
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Render the mapping/settings object for index creation.
    pub fn to_mapping(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for field in &self.keyword_fields {
            properties.insert(field.clone(), json!({ "type": "keyword" }));
        }
        for field in &self.text_fields {
            properties.insert(field.clone(), json!({ "type": "text" }));
        }
        properties.insert(
            self.vector_field.clone(),
            json!({
                "type": "knn_vector",
                "dimension": self.dimension,
                "method": {
                    "name": "hnsw",
                    "space_type": "cosinesimil",
                    "engine": "lucene"
                }
            }),
        );

        json!({
            "settings": { "index": { "knn": true } },
            "mappings": { "properties": properties }
        })
    }
}

/// Dimension declared for `field` in a mapping, if it is a `knn_vector`.
pub fn vector_dimension(mapping: &Value, field: &str) -> Option<usize> {
    let property = mapping.pointer(&format!("/mappings/properties/{}", field))?;
    if property["type"] != "knn_vector" {
        return None;
    }
    property["dimension"].as_u64().map(|d| d as usize)
}

/// A mapping must be an object carrying `mappings` and/or `settings`.
pub fn validate_mapping(mapping: &Value) -> Result<()> {
    let object = mapping
        .as_object()
        .ok_or_else(|| HybridError::invalid_query("mapping must be a JSON object"))?;
    if !object.contains_key("mappings") && !object.contains_key("settings") {
        return Err(HybridError::invalid_query(
            "mapping must contain \"mappings\" or \"settings\"",
        ));
    }
    Ok(())
}

/// Index names must be non-empty, lowercase and free of whitespace.
pub fn validate_index_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(HybridError::invalid_query("index name must not be empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(HybridError::invalid_query(format!(
            "index name '{}' must not contain whitespace",
            name
        )));
    }
    if name.chars().any(char::is_uppercase) {
        return Err(HybridError::invalid_query(format!(
            "index name '{}' must be lowercase",
            name
        )));
    }
    Ok(())
}
