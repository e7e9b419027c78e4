//! SQLite-backed embedding store.
//!
//! One row per document in `documents`, its embedding in `vec_items` (same
//! rowid) and its text in `documents_fts` (`doc_id` = document id).

use crate::config::Settings;
use crate::embeddings::{EmbeddingProvider, RetryPolicy, TaskType};
use crate::store::hybrid::{reciprocal_rank_fusion, RRF_K};
use crate::store::schema::{create_tables, register_sqlite_vec, serialize_f32, Capabilities};
use crate::telemetry::{background_span, record_background_metrics, BackgroundJobType};
use crate::types::{Candidate, MapperError, Result, SchemaField};
use futures::stream::{self, StreamExt};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Document waiting to be embedded and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    /// Source file the text came from
    pub file_path: String,
    /// Text that gets embedded and full-text indexed
    pub text: String,
    pub payload: serde_json::Value,
}

impl NewDocument {
    /// Wrap a schema row; the payload is the serialized field.
    pub fn from_field(field: &SchemaField, file_path: &str) -> Result<Self> {
        Ok(Self {
            file_path: file_path.to_string(),
            text: field.full_text.clone(),
            payload: serde_json::to_value(field)?,
        })
    }

    pub fn content_hash(&self) -> String {
        blake3::hash(self.text.as_bytes()).to_hex().to_string()
    }
}

/// Row of `documents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: i64,
    pub file_path: String,
    pub text: String,
    pub payload: serde_json::Value,
}

impl StoredDocument {
    /// Payload as a schema row, if that is what was stored.
    pub fn schema_field(&self) -> Option<SchemaField> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// A document with its relevance score (higher is better).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: StoredDocument,
    pub score: f32,
}

/// Outcome of an indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub indexed: usize,
    /// Already stored (same content hash) or repeated in the input
    pub skipped: usize,
    /// Embedding gave up or returned an unusable vector
    pub failed: usize,
}

/// Embedding store with vector, keyword and hybrid search.
///
/// The connection sits behind a mutex; it is only locked for synchronous
/// SQL and never held across an await.
pub struct VectorSearchService {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_size: usize,
    batch_size: usize,
    max_concurrent_batches: usize,
    retry: RetryPolicy,
    capabilities: Capabilities,
}

impl VectorSearchService {
    /// Open (or create) the store.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Database file, or a directory holding `vector_store.db`
    /// * `embedder` - Provider used for documents and queries
    /// * `settings` - Batch size, concurrency and retry policy
    ///
    /// # Errors
    ///
    /// Returns `MapperError::ConfigError` if the provider's dimensionality
    /// disagrees with `settings.vector_size`, `MapperError::StorageError` if
    /// SQLite cannot open the file
    pub fn open<P: AsRef<Path>>(db_path: P, embedder: Arc<dyn EmbeddingProvider>, settings: &Settings) -> Result<Self> {
        if embedder.dimensions() != settings.vector_size {
            return Err(MapperError::ConfigError(format!(
                "Embedding model {} produces {} dimensions, store expects {}",
                embedder.model_name(),
                embedder.dimensions(),
                settings.vector_size
            )));
        }

        let db_path = crate::config::DataPaths::resolve_db_path(db_path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        register_sqlite_vec();
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        let capabilities = create_tables(&conn, settings.vector_size)?;

        tracing::info!(
            path = %db_path.display(),
            vectors = capabilities.vectors,
            full_text = capabilities.full_text,
            "Vector store opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            embedder,
            vector_size: settings.vector_size,
            batch_size: settings.embed_batch_size.max(1),
            max_concurrent_batches: settings.max_concurrent_batches.max(1),
            retry: settings.retry.clone(),
            capabilities,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MapperError::InternalError("vector store connection poisoned".to_string()))
    }

    /// Embed a batch through the retry policy.
    ///
    /// Exhausted retries or a fatal error yield an empty result and a warning.
    pub async fn embed_with_retry(&self, texts: &[String], task: TaskType) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }
        let embedder = &self.embedder;
        match self
            .retry
            .run("embed_batch", move || async move { embedder.embed_batch(texts, task).await })
            .await
        {
            Ok(vectors) => vectors,
            Err(e) => {
                tracing::warn!(texts = texts.len(), error = %e, "Embedding failed, returning empty result");
                Vec::new()
            }
        }
    }

    /// Embed and store documents.
    ///
    /// Batches are embedded concurrently (bounded by `max_concurrent_batches`);
    /// each finished batch is written in its own transaction, in completion order.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::StorageError` if a write fails. Embedding
    /// failures are counted in [`IndexReport::failed`] instead.
    pub async fn add_documents(&self, documents: Vec<NewDocument>) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        let total = documents.len();

        let fresh = {
            let conn = self.lock()?;
            let mut seen = HashSet::new();
            let mut fresh = Vec::with_capacity(documents.len());
            let mut stmt = conn.prepare_cached("SELECT 1 FROM documents WHERE content_hash = ?1")?;
            for doc in documents {
                let hash = doc.content_hash();
                if !seen.insert(hash.clone()) || stmt.exists(params![hash])? {
                    report.skipped += 1;
                    continue;
                }
                fresh.push((hash, doc));
            }
            fresh
        };

        if fresh.is_empty() {
            tracing::info!(skipped = report.skipped, "Nothing new to index");
            return Ok(report);
        }

        let batches: Vec<Vec<(String, NewDocument)>> = fresh
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let batch_count = batches.len();
        tracing::info!(
            documents = total,
            new = fresh.len(),
            batches = batch_count,
            concurrency = self.max_concurrent_batches,
            "Indexing documents"
        );

        let mut pending = stream::iter(batches.into_iter().enumerate().map(|(idx, batch)| {
            let span = background_span(BackgroundJobType::EmbeddingBatch, &format!("batch {}", idx + 1));
            async move {
                let start = Instant::now();
                let texts: Vec<String> = batch.iter().map(|(_, doc)| doc.text.clone()).collect();
                let vectors = self.embed_with_retry(&texts, TaskType::RetrievalDocument).await;
                let status = if vectors.is_empty() { "failed" } else { "success" };
                record_background_metrics(Some(texts.len()), Some(start.elapsed().as_millis() as u64), status);
                (batch, vectors)
            }
            .instrument(span)
        }))
        .buffer_unordered(self.max_concurrent_batches);

        let mut completed = 0usize;
        while let Some((batch, vectors)) = pending.next().await {
            completed += 1;
            if vectors.len() != batch.len() {
                report.failed += batch.len();
                tracing::warn!(batch = completed, of = batch_count, "Batch skipped, no embeddings");
                continue;
            }
            let (inserted, rejected) = self.insert_batch(&batch, &vectors)?;
            report.indexed += inserted;
            report.failed += rejected;
            tracing::info!(batch = completed, of = batch_count, inserted, "Batch stored");
        }

        Ok(report)
    }

    /// Write one embedded batch in a single transaction.
    fn insert_batch(&self, batch: &[(String, NewDocument)], vectors: &[Vec<f32>]) -> Result<(usize, usize)> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        let mut rejected = 0;

        for ((hash, doc), vector) in batch.iter().zip(vectors) {
            if vector.len() != self.vector_size {
                tracing::warn!(
                    expected = self.vector_size,
                    got = vector.len(),
                    file = %doc.file_path,
                    "Embedding has wrong dimensionality, skipping document"
                );
                rejected += 1;
                continue;
            }

            tx.execute(
                "INSERT INTO documents (file_path, text, payload, content_hash) VALUES (?1, ?2, ?3, ?4)",
                params![doc.file_path, doc.text, doc.payload.to_string(), hash],
            )?;
            let id = tx.last_insert_rowid();

            if self.capabilities.vectors {
                tx.execute(
                    "INSERT INTO vec_items (rowid, embedding) VALUES (?1, ?2)",
                    params![id, serialize_f32(vector)],
                )?;
            }
            if self.capabilities.full_text {
                tx.execute(
                    "INSERT INTO documents_fts (text, doc_id) VALUES (?1, ?2)",
                    params![doc.text, id],
                )?;
            }
            inserted += 1;
        }

        tx.commit()?;
        Ok((inserted, rejected))
    }

    /// Index schema rows, tagging each with its source file.
    pub async fn index_fields(&self, fields: &[(String, SchemaField)]) -> Result<IndexReport> {
        let documents = fields
            .iter()
            .map(|(file, field)| NewDocument::from_field(field, file))
            .collect::<Result<Vec<_>>>()?;
        self.add_documents(documents).await
    }

    /// Nearest neighbours of `query` by cosine similarity.
    ///
    /// Returns an empty list if the query could not be embedded.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::SearchError` if vector search is unavailable
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if !self.capabilities.vectors {
            return Err(MapperError::SearchError("vec_items table is unavailable".to_string()));
        }
        let mut vectors = self.embed_with_retry(&[query.to_string()], TaskType::RetrievalQuery).await;
        let Some(vector) = vectors.pop() else {
            return Ok(Vec::new());
        };
        self.search_by_vector(&vector, top_k)
    }

    /// KNN over stored embeddings with a precomputed query vector.
    pub fn search_by_vector(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.vector_size {
            return Err(MapperError::SearchError(format!(
                "query vector has {} dimensions, expected {}",
                vector.len(),
                self.vector_size
            )));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT d.id, d.file_path, d.text, d.payload, v.distance
             FROM (SELECT rowid, distance FROM vec_items WHERE embedding MATCH ?1 AND k = ?2) v
             JOIN documents d ON d.id = v.rowid
             ORDER BY v.distance",
        )?;
        let hits = stmt
            .query_map(params![serialize_f32(vector), top_k as i64], |row| {
                let distance: f64 = row.get(4)?;
                Ok(SearchHit {
                    document: read_document(row)?,
                    score: (1.0 - distance) as f32,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hits)
    }

    /// BM25 full-text search over document text.
    ///
    /// Terms are quoted and OR-ed, so FTS5 operators in user input are inert.
    pub fn keyword_search(&self, terms: &[String], limit: usize) -> Result<Vec<SearchHit>> {
        if !self.capabilities.full_text {
            return Err(MapperError::SearchError("documents_fts table is unavailable".to_string()));
        }
        let Some(fts_query) = fts_query(terms) else {
            return Ok(Vec::new());
        };

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT d.id, d.file_path, d.text, d.payload, bm25(documents_fts) AS rank
             FROM documents_fts
             JOIN documents d ON d.id = CAST(documents_fts.doc_id AS INTEGER)
             WHERE documents_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let hits = stmt
            .query_map(params![fts_query, limit as i64], |row| {
                let rank: f64 = row.get(4)?;
                Ok(SearchHit {
                    document: read_document(row)?,
                    score: -rank as f32,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hits)
    }

    /// Vector and keyword results fused by reciprocal rank.
    ///
    /// Without explicit keywords the query's words are used. Either side
    /// being unavailable degrades to the other.
    pub async fn hybrid_search(&self, query: &str, keywords: &[String], top_k: usize) -> Result<Vec<SearchHit>> {
        let depth = top_k.saturating_mul(2).max(top_k);
        let mut lists = Vec::with_capacity(2);

        if self.capabilities.vectors {
            lists.push(self.search(query, depth).await?);
        }
        if self.capabilities.full_text {
            let terms: Vec<String> = if keywords.is_empty() {
                query.split_whitespace().map(str::to_string).collect()
            } else {
                keywords.to_vec()
            };
            lists.push(self.keyword_search(&terms, depth)?);
        }

        Ok(reciprocal_rank_fusion(&lists, RRF_K, top_k))
    }

    /// Search hits that carry schema rows, as mapping candidates.
    pub async fn candidates(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        let hits = self.search(query, top_k).await?;
        Ok(hits
            .iter()
            .filter_map(|hit| hit.document.schema_field().map(|f| Candidate::from_field(&f, hit.score)))
            .collect())
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Distinct source files, sorted.
    pub fn files(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT file_path FROM documents ORDER BY file_path")?;
        let files = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn get(&self, id: i64) -> Result<Option<StoredDocument>> {
        let conn = self.lock()?;
        let doc = conn
            .query_row(
                "SELECT id, file_path, text, payload FROM documents WHERE id = ?1",
                params![id],
                read_document,
            )
            .optional()?;
        Ok(doc)
    }

    /// Delete every document, embedding and text entry.
    pub fn clear(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM documents", [])?;
        if self.capabilities.vectors {
            tx.execute("DELETE FROM vec_items", [])?;
        }
        if self.capabilities.full_text {
            tx.execute("DELETE FROM documents_fts", [])?;
        }
        tx.commit()?;
        tracing::info!("Vector store cleared");
        Ok(())
    }
}

fn read_document(row: &Row<'_>) -> rusqlite::Result<StoredDocument> {
    let payload: Option<String> = row.get(3)?;
    Ok(StoredDocument {
        id: row.get(0)?,
        file_path: row.get(1)?,
        text: row.get(2)?,
        payload: payload
            .and_then(|p| serde_json::from_str(&p).ok())
            .unwrap_or(serde_json::Value::Null),
    })
}

/// Quote each term for FTS5 and OR them together.
fn fts_query(terms: &[String]) -> Option<String> {
    let quoted: Vec<String> = terms
        .iter()
        .map(|t| t.replace('"', " "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if quoted.is_empty() {
        None
    } else {
        Some(quoted.join(" OR "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_query_quotes_terms() {
        let terms = vec!["VNDNAM".to_string(), "vendor \"name\"".to_string(), "  ".to_string()];
        assert_eq!(fts_query(&terms).unwrap(), "\"VNDNAM\" OR \"vendor  name\"");
        assert!(fts_query(&[]).is_none());
    }

    #[test]
    fn test_new_document_from_field() {
        let field = SchemaField::new("AVM", "VNDNAM", "Vendor Name", "A", "ACME", "vendor name");
        let doc = NewDocument::from_field(&field, "AVM_Schema_Enriched.csv").unwrap();
        assert_eq!(doc.text, field.full_text);
        assert_eq!(doc.content_hash(), field.content_hash());

        let stored = StoredDocument {
            id: 1,
            file_path: doc.file_path.clone(),
            text: doc.text.clone(),
            payload: doc.payload.clone(),
        };
        assert_eq!(stored.schema_field().unwrap(), field);
    }
}
