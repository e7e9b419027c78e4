//! Persistent embedding store: SQLite with sqlite-vec and FTS5.

pub mod hybrid;
pub mod schema;
pub mod service;

pub use hybrid::{reciprocal_rank_fusion, RRF_K};
pub use schema::{serialize_f32, Capabilities};
pub use service::{IndexReport, NewDocument, SearchHit, StoredDocument, VectorSearchService};
