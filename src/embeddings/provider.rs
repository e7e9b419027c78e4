//! Embedding provider trait.

use crate::types::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the embedding will be used for.
///
/// Documents and queries are embedded asymmetrically by retrieval models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Text that will be stored and searched
    RetrievalDocument,
    /// Text used to search stored documents
    RetrievalQuery,
    /// Symmetric comparison
    SemanticSimilarity,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            Self::RetrievalQuery => "RETRIEVAL_QUERY",
            Self::SemanticSimilarity => "SEMANTIC_SIMILARITY",
        }
    }
}

/// Embedding provider trait.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for single text.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::EmbeddingError` if generation fails, or an API
    /// error that the retry policy may classify as recoverable
    async fn embed(&self, text: &str, task: TaskType) -> Result<Vec<f32>>;

    /// Generate embeddings for batch of texts, one vector per input in order.
    async fn embed_batch(&self, texts: &[String], task: TaskType) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimensionality.
    fn dimensions(&self) -> usize;

    /// Model identifier (stored alongside cached vectors).
    fn model_name(&self) -> &str;
}
