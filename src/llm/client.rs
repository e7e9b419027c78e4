//! Gemini text generation client.

use crate::config::{Settings, DEFAULT_API_BASE};
use crate::types::{MapperError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Model output with token accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub text: String,
    /// `usageMetadata.totalTokenCount`, 0 when not reported
    pub tokens: u64,
}

/// Single-prompt text generation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt` at temperature 0.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::LlmError` on empty output, or an API error
    async fn generate(&self, prompt: &str) -> Result<Generation>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseCandidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// Entry of the model listing.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Resource name, `models/...`
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    api_key: String,
    api_base: String,
    model: String,
    client: Client,
}

impl GeminiClient {
    /// Create new client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Gemini API key
    /// * `model` - Model name (e.g., "gemini-3-pro-preview")
    pub fn new(api_key: String, model: &str) -> Self {
        Self {
            api_key,
            api_base: DEFAULT_API_BASE.to_string(),
            model: model.trim_start_matches("models/").to_string(),
            client: Client::new(),
        }
    }

    /// Client configured from settings.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::ConfigError` if no API key is set
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(settings.require_api_key()?.to_string(), &settings.llm_model).with_api_base(&settings.api_base))
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// All models visible to the key, following pagination.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/models", self.api_base))
                .header("x-goog-api-key", &self.api_key)
                .query(&[("pageSize", "1000")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(MapperError::from_status(status.as_u16(), body));
            }

            let page: ModelList = response
                .json()
                .await
                .map_err(|e| MapperError::LlmError(format!("Failed to parse model list: {}", e)))?;
            models.extend(page.models);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(models)
    }

    /// One-word round trip to verify the key and model.
    pub async fn ping(&self) -> Result<Generation> {
        self.generate("Reply with the single word: pong").await
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.api_base, self.model))
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&json!({
                "contents": [{"role": "user", "parts": [{"text": prompt}]}],
                "generationConfig": {"temperature": 0}
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MapperError::LlmError(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(MapperError::from_status(status.as_u16(), body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| MapperError::LlmError(format!("Failed to parse Gemini response: {}", e)))?;

        let candidate = parsed
            .candidates
            .first()
            .ok_or_else(|| MapperError::LlmError("No candidates from Gemini".to_string()))?;

        if let Some(reason) = candidate.finish_reason.as_deref().filter(|r| *r != "STOP") {
            tracing::warn!(reason, model = %self.model, "Gemini stopped generation early");
        }

        let text: String = candidate
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            return Err(MapperError::LlmError("Gemini returned empty text".to_string()));
        }

        let tokens = parsed.usage_metadata.map(|u| u.total_token_count).unwrap_or(0);
        tracing::debug!(tokens, chars = text.len(), "Generation complete");
        Ok(Generation { text, tokens })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "[{\"field_index\": 0}"}, {"text": "]"}], "role": "model"},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "totalTokenCount": 42}
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(parsed.candidates[0].finish_reason.as_deref(), Some("STOP"));
        assert_eq!(parsed.usage_metadata.unwrap().total_token_count, 42);
    }

    #[test]
    fn test_model_list_parsing() {
        let body = r#"{"models": [{"name": "models/gemini-embedding-001", "displayName": "Gemini Embedding",
            "supportedGenerationMethods": ["embedContent"]}]}"#;
        let list: ModelList = serde_json::from_str(body).unwrap();
        assert_eq!(list.models[0].name, "models/gemini-embedding-001");
        assert!(list.next_page_token.is_none());
    }

    #[test]
    fn test_model_prefix_stripped() {
        let client = GeminiClient::new("key".to_string(), "models/gemini-3-pro-preview");
        assert_eq!(client.model_name(), "gemini-3-pro-preview");
    }

    #[tokio::test]
    #[ignore] // Requires GEMINI_API_KEY
    async fn test_live_ping() {
        let key = std::env::var("GEMINI_API_KEY").expect("GEMINI_API_KEY not set");
        let client = GeminiClient::new(key, crate::config::DEFAULT_LLM_MODEL);
        let generation = client.ping().await.unwrap();
        assert!(!generation.text.is_empty());
    }
}
