//! Offline stand-ins for the embedding and generation APIs.

#![allow(dead_code)]

use async_trait::async_trait;
use bpcs_mapper::embeddings::{EmbeddingProvider, TaskType};
use bpcs_mapper::llm::{Generation, TextGenerator};
use bpcs_mapper::types::{MapperError, Result, SchemaField};
use std::sync::Mutex;

/// Hashed bag-of-words embedder; identical texts get identical vectors.
pub struct HashEmbedder {
    pub dims: usize,
}

impl HashEmbedder {
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        v[0] = 1.0;
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let bucket = 1 + (hash.as_bytes()[0] as usize) % (self.dims - 1);
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str, _task: TaskType) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[String], _task: TaskType) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "hash-bow"
    }
}

/// Embedder whose every call fails with a non-retryable error.
pub struct BrokenEmbedder {
    pub dims: usize,
}

#[async_trait]
impl EmbeddingProvider for BrokenEmbedder {
    async fn embed(&self, _text: &str, _task: TaskType) -> Result<Vec<f32>> {
        Err(MapperError::EmbeddingError("offline".to_string()))
    }

    async fn embed_batch(&self, _texts: &[String], _task: TaskType) -> Result<Vec<Vec<f32>>> {
        Err(MapperError::EmbeddingError("offline".to_string()))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "broken"
    }
}

/// Generator answering with canned replies, in order.
pub struct Scripted {
    replies: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl Scripted {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for Scripted {
    async fn generate(&self, prompt: &str) -> Result<Generation> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(MapperError::LlmError("no scripted reply left".to_string()));
        }
        Ok(Generation {
            text: replies.remove(0),
            tokens: 7,
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn vendor_fields() -> Vec<SchemaField> {
    vec![
        SchemaField::new("AVM", "VNDNAM", "Vendor Name", "CHAR(30)", "ACME CORP", "Name of the vendor"),
        SchemaField::new("AVM", "VNDAD1", "Vendor Address 1", "CHAR(30)", "1 MAIN ST", "First address line"),
        SchemaField::new("APH", "PHINV", "Invoice Number", "CHAR(15)", "INV0001", "Supplier invoice number"),
    ]
}

/// Hash embedder that counts batch calls and reports a chosen model name.
pub struct CountingEmbedder {
    inner: HashEmbedder,
    model: String,
    pub batch_calls: std::sync::atomic::AtomicUsize,
}

impl CountingEmbedder {
    pub fn new(dims: usize, model: &str) -> Self {
        Self {
            inner: HashEmbedder { dims },
            model: model.to_string(),
            batch_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.batch_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    async fn embed(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        self.inner.embed(text, task).await
    }

    async fn embed_batch(&self, texts: &[String], task: TaskType) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.embed_batch(texts, task).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
