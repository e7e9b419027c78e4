//! Gemini embedding API client.

use crate::config::DEFAULT_API_BASE;
use crate::embeddings::provider::{EmbeddingProvider, TaskType};
use crate::types::{MapperError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Gemini limit: 100 requests per `batchEmbedContents` call.
const MAX_BATCH: usize = 100;

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

/// Single `embedContent` request (also one entry of a batch request).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

/// Gemini embedding provider.
pub struct GeminiEmbedder {
    api_key: String,
    api_base: String,
    /// Resource name, always `models/...`
    model: String,
    dimensions: usize,
    client: Client,
}

impl GeminiEmbedder {
    /// Create new Gemini embedder.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Gemini API key
    /// * `model` - Model name (e.g., "gemini-embedding-001")
    pub fn new(api_key: String, model: &str) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };

        Self {
            api_key,
            api_base: DEFAULT_API_BASE.to_string(),
            dimensions: Self::dimensions_for(&model),
            model,
            client: Client::new(),
        }
    }

    /// Point the client at a different endpoint (proxies, regional hosts).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Request a reduced output dimensionality (supported by gemini-embedding-001).
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Native dimensionality of known models.
    pub fn dimensions_for(model: &str) -> usize {
        match model.trim_start_matches("models/") {
            "gemini-embedding-001" => 3072,
            "text-embedding-004" | "embedding-001" => 768,
            _ => 3072,
        }
    }

    /// Embed up to `MAX_BATCH` texts in one call.
    async fn embed_chunk(&self, texts: &[String], task: TaskType) -> Result<Vec<Vec<f32>>> {
        let title = match task {
            TaskType::RetrievalDocument => Some("BPCS Schema"),
            _ => None,
        };

        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: &self.model,
                    content: Content {
                        parts: vec![Part { text }],
                    },
                    task_type: task.as_str(),
                    title,
                    output_dimensionality: self.dimensions,
                })
                .collect(),
        };

        let response = self
            .client
            .post(format!("{}/{}:batchEmbedContents", self.api_base, self.model))
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MapperError::from_status(status.as_u16(), error_text));
        }

        let parsed: BatchEmbedResponse = response
            .json()
            .await
            .map_err(|e| MapperError::EmbeddingError(format!("Failed to parse Gemini response: {}", e)))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(MapperError::EmbeddingError(format!(
                "Gemini returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }

        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    async fn embed(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        let embeddings = self.embed_chunk(&[text.to_string()], task).await?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| MapperError::EmbeddingError("No embedding returned from Gemini".to_string()))
    }

    async fn embed_batch(&self, texts: &[String], task: TaskType) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH) {
            all_embeddings.extend(self.embed_chunk(chunk, task).await?);
        }
        Ok(all_embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        self.model.trim_start_matches("models/")
    }
}
