//! Core data types for the mapper.
//!
//! - `SchemaField`: one documented legacy column
//! - `Candidate`: a search hit offered to the LLM
//! - `MappingDecision` / `Correction`: parsed LLM output
//! - `MapperError`: error type for all operations

pub mod error;
pub mod field;
pub mod mapping;

pub use error::{MapperError, Result};
pub use field::{Candidate, SchemaField, TableDescriptions};
pub use mapping::{Correction, FbdiField, MappingAction, MappingDecision, MappingRecord};
