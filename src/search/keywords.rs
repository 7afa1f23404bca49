//! Keyword extraction for the lexical stream.
//!
//! An LLM turns a user question into a short keyword list. Model output is
//! loosely formatted, so `parse_keywords` accepts several shapes.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::KeywordConfig;
use crate::error::{KeywordError, Result};

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([^"']+)["']"#).expect("Invalid regex"));

const SYSTEM_PROMPT: &str = "You extract search keywords from questions about internal \
company regulations. Reply with a JSON array of at most {max} short keywords in the \
language of the question, most important first, and nothing else.";

/// Keywords plus the raw model text they were parsed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedKeywords {
    pub keywords: Vec<String>,
    pub raw_response: String,
}

/// Trait for keyword extraction.
#[async_trait]
pub trait KeywordExtractor: Send + Sync {
    async fn extract(&self, user_input: &str) -> Result<ExtractedKeywords>;
}

fn clean(keyword: &str) -> String {
    keyword
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '[' | ']'))
        .trim()
        .to_string()
}

fn finish(candidates: impl IntoIterator<Item = String>, max_keywords: usize) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for keyword in candidates.into_iter().map(|k| clean(&k)) {
        if !keyword.is_empty() && !keywords.contains(&keyword) {
            keywords.push(keyword);
        }
        if keywords.len() == max_keywords {
            break;
        }
    }
    keywords
}

/// Parse a keyword list out of free-form model output.
///
/// Tried in order: a JSON string array anywhere in the text, quoted strings,
/// a comma separated list, then the whole text as one keyword.
pub fn parse_keywords(raw: &str, max_keywords: usize) -> Vec<String> {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return Vec::new();
    }

    if let (Some(start), Some(end)) = (cleaned.find('['), cleaned.rfind(']')) {
        if start < end {
            if let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(&cleaned[start..=end])
            {
                let strings = items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string));
                return finish(strings, max_keywords);
            }
        }
    }

    let quoted: Vec<String> = QUOTED
        .captures_iter(cleaned)
        .map(|c| c[1].to_string())
        .collect();
    if !quoted.is_empty() {
        return finish(quoted, max_keywords);
    }

    if cleaned.contains(',') {
        return finish(cleaned.split(',').map(str::to_string), max_keywords);
    }

    finish([cleaned.to_string()], max_keywords)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// Keyword extraction through an OpenAI-compatible chat completion endpoint.
pub struct LlmKeywordExtractor {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_keywords: usize,
}

impl LlmKeywordExtractor {
    pub fn from_config(config: &KeywordConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KeywordError::Api(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_keywords: config.max_keywords.max(1),
        })
    }
}

#[async_trait]
impl KeywordExtractor for LlmKeywordExtractor {
    async fn extract(&self, user_input: &str) -> Result<ExtractedKeywords> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.replace("{max}", &self.max_keywords.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: user_input.to_string(),
                },
            ],
            temperature: 0.0,
        };

        let mut req_builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.bearer_auth(api_key);
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| KeywordError::Api(format!("LLM API error: {}", e)))?;

        if !response.status().is_success() {
            return Err(KeywordError::Api(format!(
                "LLM API returned status: {}",
                response.status()
            ))
            .into());
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| KeywordError::Api(format!("Failed to parse LLM response: {}", e)))?;

        let raw_response = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| KeywordError::Api("LLM response has no choices".to_string()))?;

        let keywords = parse_keywords(&raw_response, self.max_keywords);
        tracing::debug!(?keywords, "Extracted keywords");

        Ok(ExtractedKeywords {
            keywords,
            raw_response,
        })
    }
}
