//! In-memory knowledge base: schema rows plus their embedding matrix.

use crate::config::{DataPaths, Settings};
use crate::embeddings::{top_k, EmbeddingProvider, RetryPolicy, TaskType};
use crate::knowledge::loader::{discover_schema_files, load_schema_files};
use crate::telemetry::{background_span, record_background_metrics, BackgroundJobType};
use crate::types::{Candidate, Result, SchemaField};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// On-disk form of the knowledge base.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    /// Hash of the schema files the cache was built from
    fingerprint: String,
    model: String,
    fields: Vec<SchemaField>,
    embeddings: Vec<Vec<f32>>,
}

/// Schema rows with one embedding per row.
///
/// `embeddings` is `None` when vectorization failed; search then returns nothing.
pub struct KnowledgeBase {
    fields: Vec<SchemaField>,
    embeddings: Option<Vec<Vec<f32>>>,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl KnowledgeBase {
    /// Load schema CSVs and embed them, reusing the cache when possible.
    ///
    /// The cache is only read and written when no schema filter is active,
    /// and is ignored when the schema files or embedding model changed.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::SchemaLoadError` if the schema directory is missing
    pub async fn build(paths: &DataPaths, settings: &Settings, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let span = background_span(BackgroundJobType::IndexBuild, &paths.bpcs_data_dir.display().to_string());
        Self::build_inner(paths, settings, embedder).instrument(span).await
    }

    async fn build_inner(paths: &DataPaths, settings: &Settings, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let start = Instant::now();

        let files = discover_schema_files(&paths.bpcs_data_dir, &settings.schema_filter)?;
        let use_cache = settings.schema_filter.is_empty();
        let cache_path = paths.cache_file();
        let fingerprint = fingerprint(&files)?;

        let mut kb = Self {
            fields: Vec::new(),
            embeddings: None,
            embedder,
            retry: settings.retry.clone(),
            batch_size: settings.embed_batch_size.max(1),
        };

        if use_cache {
            if let Some(cache) = kb.read_cache(&cache_path, &fingerprint) {
                kb.fields = cache.fields;
                kb.embeddings = Some(cache.embeddings);
                tracing::info!(fields = kb.fields.len(), "Loaded knowledge base from cache");
                record_background_metrics(Some(kb.fields.len()), Some(start.elapsed().as_millis() as u64), "cached");
                return Ok(kb);
            }
        }

        kb.fields = load_schema_files(&files).into_iter().map(|(_, field)| field).collect();
        kb.embeddings = kb.vectorize().await;

        if use_cache {
            if let Some(embeddings) = &kb.embeddings {
                kb.write_cache(&cache_path, &fingerprint, embeddings);
            }
        }

        let status = if kb.embeddings.is_some() { "success" } else { "partial" };
        record_background_metrics(Some(kb.fields.len()), Some(start.elapsed().as_millis() as u64), status);
        Ok(kb)
    }

    /// Assemble from already-loaded parts.
    pub fn from_parts(
        fields: Vec<SchemaField>,
        embeddings: Option<Vec<Vec<f32>>>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: &Settings,
    ) -> Self {
        Self {
            fields,
            embeddings,
            embedder,
            retry: settings.retry.clone(),
            batch_size: settings.embed_batch_size.max(1),
        }
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_vectorized(&self) -> bool {
        self.embeddings.is_some()
    }

    /// Distinct table names.
    pub fn tables(&self) -> BTreeSet<String> {
        self.fields.iter().map(|f| f.table.clone()).collect()
    }

    /// Embed every field in batches. Any failed batch discards the whole matrix.
    async fn vectorize(&self) -> Option<Vec<Vec<f32>>> {
        if self.fields.is_empty() {
            return None;
        }

        tracing::info!(fields = self.fields.len(), model = self.embedder.model_name(), "Vectorizing schema fields");
        let texts: Vec<String> = self.fields.iter().map(|f| f.full_text.clone()).collect();
        let mut embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let embedder = &self.embedder;
            let result = self
                .retry
                .run("vectorize", move || async move {
                    embedder.embed_batch(chunk, TaskType::RetrievalDocument).await
                })
                .await;
            match result {
                Ok(vectors) if vectors.len() == chunk.len() => embeddings.extend(vectors),
                Ok(vectors) => {
                    tracing::error!(expected = chunk.len(), got = vectors.len(), "Embedding count mismatch");
                    return None;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error during vectorization");
                    return None;
                }
            }
            tracing::info!(processed = embeddings.len(), total = texts.len(), "Vectorized fields");
        }

        Some(embeddings)
    }

    /// Top-k schema rows for `query` by cosine similarity.
    ///
    /// Returns an empty list when the base is not vectorized or the query
    /// cannot be embedded.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<Candidate>> {
        let Some(matrix) = &self.embeddings else {
            return Ok(Vec::new());
        };

        let embedder = &self.embedder;
        let query_vector = match self
            .retry
            .run("embed_query", move || async move { embedder.embed(query, TaskType::RetrievalQuery).await })
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Error searching knowledge base");
                return Ok(Vec::new());
            }
        };

        Ok(top_k(&query_vector, matrix, k)
            .into_iter()
            .map(|(idx, score)| Candidate::from_field(&self.fields[idx], score))
            .collect())
    }

    fn read_cache(&self, path: &Path, fingerprint: &str) -> Option<CacheFile> {
        if !path.exists() {
            return None;
        }
        let span = background_span(BackgroundJobType::CacheSync, &path.display().to_string());
        let _guard = span.enter();

        let cache: CacheFile = match File::open(path)
            .map_err(crate::types::MapperError::from)
            .and_then(|f| Ok(bincode::deserialize_from::<_, CacheFile>(BufReader::new(f))?))
        {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load cache");
                return None;
            }
        };

        if cache.fingerprint != fingerprint || cache.model != self.embedder.model_name() {
            tracing::info!("Cache is stale, rebuilding");
            return None;
        }
        if cache.fields.len() != cache.embeddings.len() {
            tracing::warn!("Cache is inconsistent, rebuilding");
            return None;
        }
        Some(cache)
    }

    fn write_cache(&self, path: &Path, fingerprint: &str, embeddings: &[Vec<f32>]) {
        let span = background_span(BackgroundJobType::CacheSync, &path.display().to_string());
        let _guard = span.enter();

        let cache = CacheFile {
            fingerprint: fingerprint.to_string(),
            model: self.embedder.model_name().to_string(),
            fields: self.fields.clone(),
            embeddings: embeddings.to_vec(),
        };
        let result = File::create(path)
            .map_err(crate::types::MapperError::from)
            .and_then(|f| Ok(bincode::serialize_into(BufWriter::new(f), &cache)?));
        match result {
            Ok(()) => tracing::info!(path = %path.display(), "Saved knowledge base to cache"),
            Err(e) => tracing::warn!(error = %e, "Failed to save cache"),
        }
    }
}

/// Hash of file names and contents, in order.
fn fingerprint(files: &[PathBuf]) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = Vec::new();
    for path in files {
        hasher.update(path.to_string_lossy().as_bytes());
        buf.clear();
        File::open(path)?.read_to_end(&mut buf)?;
        hasher.update(&buf);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Delete the cache file if present.
pub fn clear_cache(paths: &DataPaths) -> Result<bool> {
    let path = paths.cache_file();
    if path.exists() {
        fs::remove_file(&path)?;
        return Ok(true);
    }
    Ok(false)
}
