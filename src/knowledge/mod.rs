//! BPCS schema knowledge: CSV loading, the in-memory knowledge base and
//! documentation enrichment.

pub mod base;
pub mod docs;
pub mod loader;

pub use base::{clear_cache, KnowledgeBase};
pub use docs::{enrich_schemas, BpcsDocs, EnrichReport};
pub use loader::{discover_schema_files, load_schema_file, load_schema_files};

use crate::store::VectorSearchService;
use crate::types::{Candidate, Result};
use async_trait::async_trait;

/// Anything that can propose legacy columns for a query.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Best `top_k` candidates, highest score first.
    async fn candidates(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>>;
}

#[async_trait]
impl CandidateSource for KnowledgeBase {
    async fn candidates(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        self.search(query, top_k).await
    }
}

#[async_trait]
impl CandidateSource for VectorSearchService {
    async fn candidates(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        VectorSearchService::candidates(self, query, top_k).await
    }
}
