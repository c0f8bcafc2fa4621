//! Ollama-compatible model provider.
//!
//! Endpoint: POST {base_url}/api/generate
//! Auth: optional Bearer token

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::ModelCandidate;

use super::{ModelProvider, ProviderError};

/// Used when a candidate has no base URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Request body for /api/generate
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    format: &'static str,
    stream: bool,
}

/// Response body of /api/generate (only the field we need)
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<Value>,
}

/// Calls the Ollama generate API with a JSON-format prompt
pub struct OllamaProvider {
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    fn endpoint(candidate: &ModelCandidate) -> String {
        let base = candidate.data.base_url.trim();
        let base = if base.is_empty() { DEFAULT_BASE_URL } else { base };
        format!("{}/api/generate", base.trim_end_matches('/'))
    }
}

/// Build the analysis prompt for a batch of posts
pub fn build_prompt(texts: &[String]) -> String {
    let posts = serde_json::to_string(texts).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are analyzing customer messages posted on social media about a telecommunications provider's customer service. For each post, provide:
- sentiment: 'negative', 'neutral', or 'positive'
- priority: 'high', 'normal', or 'low'
- topic: the main topic of the post

There are {count} posts:
{posts}

Return one value per post, in the same order, as valid JSON in exactly this format:
{{"data": {{"sentiment": [...], "priority": [...], "topic": [...]}}}}"#,
        count = texts.len(),
        posts = posts,
    )
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn analyze(&self, candidate: &ModelCandidate, texts: &[String]) -> Result<Value, ProviderError> {
        let url = Self::endpoint(candidate);
        let body = GenerateRequest {
            model: &candidate.data.model,
            prompt: build_prompt(texts),
            format: "json",
            stream: false,
        };

        let mut request = self.client.post(&url).json(&body);
        if !candidate.data.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", candidate.data.api_key));
        }

        debug!(uid = %candidate.uid, %url, rows = texts.len(), "Calling model");

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transient(format!("HTTP {}: {}", status, text)));
        }

        let raw = response
            .text()
            .await
            .map_err(|e| ProviderError::Transient(format!("failed to read body: {}", e)))?;

        let parsed: GenerateResponse = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::Malformed(format!("invalid generate response: {}", e)))?;

        match parsed.response {
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(ProviderError::Malformed("empty response".to_string()))
            }
            Some(Value::Null) | None => Err(ProviderError::Malformed("missing response field".to_string())),
            Some(value) => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let mut candidate = ModelCandidate::new("a");
        assert_eq!(OllamaProvider::endpoint(&candidate), "http://localhost:11434/api/generate");

        candidate.data.base_url = "https://llm.example/".into();
        assert_eq!(OllamaProvider::endpoint(&candidate), "https://llm.example/api/generate");
    }

    #[test]
    fn test_prompt_lists_posts() {
        let prompt = build_prompt(&["first \"quoted\"".to_string(), "second".to_string()]);
        assert!(prompt.contains("There are 2 posts"));
        assert!(prompt.contains(r#"["first \"quoted\"","second"]"#));
        assert!(prompt.contains(r#"{"data": {"sentiment": [...]"#));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let provider = OllamaProvider::new(Duration::from_millis(500)).unwrap();
        let mut candidate = ModelCandidate::new("a");
        candidate.data.base_url = "http://127.0.0.1:9".into();

        let err = provider
            .analyze(&candidate, &["hi".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transient(_)));
    }
}
