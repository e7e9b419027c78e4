//! Legacy schema field records and search candidates.

use crate::types::{MapperError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One column of a BPCS table, as documented in a `*_Schema_Enriched.csv` file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaField {
    /// BPCS table name (e.g., "AVM")
    pub table: String,

    /// Column name (e.g., "VNDNAM")
    pub column: String,

    /// Short human label
    #[serde(default)]
    pub label: String,

    /// Declared data type
    #[serde(default)]
    pub data_type: String,

    /// Example value taken from the legacy system
    #[serde(default)]
    pub sample_entry: String,

    /// Free-text description
    #[serde(default)]
    pub description: String,

    /// Text that gets embedded
    pub full_text: String,
}

impl SchemaField {
    /// Create a field and derive its embedding text.
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        label: impl Into<String>,
        data_type: impl Into<String>,
        sample_entry: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let table = table.into();
        let column = column.into();
        let label = label.into();
        let data_type = data_type.into();
        let description = description.into();
        let full_text = format!(
            "Table: {} | Column: {} | Label: {} | Type: {} | Description: {}",
            table, column, label, data_type, description
        );

        Self {
            table,
            column,
            label,
            data_type,
            sample_entry: sample_entry.into(),
            description,
            full_text,
        }
    }

    /// Content hash of the embedding text.
    ///
    /// Two rows with identical text share a hash, so re-indexing skips them.
    pub fn content_hash(&self) -> String {
        blake3::hash(self.full_text.as_bytes()).to_hex().to_string()
    }

    /// `TABLE.COLUMN` reference.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}

/// A search hit offered to the LLM as a mapping option.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub table: String,
    pub column: String,
    pub description: String,
    #[serde(default)]
    pub sample_entry: String,
    pub full_text: String,
    /// Similarity (cosine for vector hits, fused rank score for hybrid hits)
    pub score: f32,
}

impl Candidate {
    pub fn from_field(field: &SchemaField, score: f32) -> Self {
        Self {
            table: field.table.clone(),
            column: field.column.clone(),
            description: field.description.clone(),
            sample_entry: field.sample_entry.clone(),
            full_text: field.full_text.clone(),
            score,
        }
    }
}

/// BPCS table name to human description, loaded from `bpcs_table_descriptions.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableDescriptions(BTreeMap<String, String>);

impl TableDescriptions {
    /// Placeholder used when a table has no entry.
    pub const MISSING: &'static str = "No description available.";

    /// Load descriptions from a JSON object file.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::IoError` or `MapperError::JsonError` if the file
    /// is unreadable or not a string-to-string object
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let map: BTreeMap<String, String> = serde_json::from_str(&content)?;
        Ok(Self(map))
    }

    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    /// Description for `table`, or the placeholder.
    pub fn describe(&self, table: &str) -> &str {
        self.0.get(table).map(String::as_str).unwrap_or(Self::MISSING)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Insert a description unless the table already has one.
    ///
    /// # Returns
    ///
    /// `true` if the entry was added
    pub fn insert_missing(&mut self, table: &str, description: &str) -> bool {
        if self.0.contains_key(table) {
            return false;
        }
        self.0.insert(table.to_string(), description.to_string());
        true
    }

    /// Save descriptions as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.0)
            .map_err(|e| MapperError::ExportError(format!("Serialize error: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_text_layout() {
        let field = SchemaField::new("AVM", "VNDNAM", "Vendor Name", "CHAR(30)", "ACME", "Vendor legal name");
        assert_eq!(
            field.full_text,
            "Table: AVM | Column: VNDNAM | Label: Vendor Name | Type: CHAR(30) | Description: Vendor legal name"
        );
        assert_eq!(field.qualified_name(), "AVM.VNDNAM");
    }

    #[test]
    fn test_content_hash_tracks_text() {
        let a = SchemaField::new("AVM", "VNDNAM", "", "", "ACME", "name");
        let b = SchemaField::new("AVM", "VNDNAM", "", "", "OTHER", "name");
        let c = SchemaField::new("AVM", "VNDNAM", "", "", "", "legal name");
        // sample entry is not embedded
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_table_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desc.json");
        std::fs::write(&path, r#"{"AVM": "Vendor master"}"#).unwrap();

        let mut desc = TableDescriptions::load(&path).unwrap();
        assert_eq!(desc.describe("AVM"), "Vendor master");
        assert_eq!(desc.describe("IIM"), TableDescriptions::MISSING);

        assert!(desc.insert_missing("IIM", "Item master"));
        assert!(!desc.insert_missing("AVM", "ignored"));
        desc.save(&path).unwrap();

        let reloaded = TableDescriptions::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.describe("AVM"), "Vendor master");
    }
}
