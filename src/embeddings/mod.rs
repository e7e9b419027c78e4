//! Embedding providers, retry policy and similarity helpers.

pub mod gemini;
pub mod provider;
pub mod retry;
pub mod similarity;

pub use gemini::GeminiEmbedder;
pub use provider::{EmbeddingProvider, TaskType};
pub use retry::RetryPolicy;
pub use similarity::{cosine_similarity, top_k};
