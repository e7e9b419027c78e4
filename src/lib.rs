//! BPCS to Oracle FBDI mapping assistant - Rust core library
//!
//! Maps columns of an Oracle FBDI import template onto legacy BPCS
//! table/column pairs:
//! - Schema CSVs are embedded and stored (SQLite + sqlite-vec + FTS5)
//! - Each target field retrieves its nearest legacy columns
//! - A language model picks a candidate, a constant or a manual flag
//! - A review pass rewrites or flags doubtful mappings
//!
//! The `mapper` binary exposes indexing, search, mapping, exploration and
//! documentation enrichment.

pub mod config;
pub mod embeddings;
pub mod knowledge;
pub mod llm;
pub mod mapping;
pub mod store;
pub mod telemetry;
pub mod types;

pub use config::{DataPaths, Settings};
pub use types::{MapperError, Result};
