//! BPCS text documentation (`bpcs.txt`) parsing and schema CSV enrichment.
//!
//! Accepted layout:
//!
//! ```text
//! Table: B610F/IIM (inv100) - Items
//! IPROD: item
//! IREF01-05: five reference fields
//! AVM (acp100) - Vendors
//! VNDNAM: vendor name
//! ```

use crate::knowledge::loader::{discover_schema_files, table_name_for};
use crate::telemetry::{background_span, record_background_metrics, BackgroundJobType};
use crate::types::{MapperError, Result, TableDescriptions};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Marker prefixed to descriptions merged from the text documentation.
pub const DOCS_MARKER: &str = "[BPCS Docs]";

/// Largest number of columns one range line may expand to.
pub const MAX_RANGE_SPAN: u32 = 999;

/// One documented table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableDoc {
    pub description: String,
    /// Column name to description, ranges already expanded
    pub columns: BTreeMap<String, String>,
}

/// Parsed `bpcs.txt`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BpcsDocs {
    pub tables: BTreeMap<String, TableDoc>,
}

impl BpcsDocs {
    /// Parse documentation text.
    ///
    /// Column lines before the first table header are ignored. A table that
    /// appears twice keeps only its last block.
    pub fn parse(text: &str) -> Result<Self> {
        let table_re = Regex::new(r"^(?:Table:\s*)?(?:B610F/)?([A-Z0-9]+)\s*(?:\(.*\))?\s*-\s*(.*)")
            .map_err(|e| MapperError::InternalError(e.to_string()))?;
        let column_re =
            Regex::new(r"^([A-Z0-9]+)(?:-([0-9]+))?:\s*(.*)").map_err(|e| MapperError::InternalError(e.to_string()))?;
        let range_re = Regex::new(r"^([A-Z]+)([0-9]+)$").map_err(|e| MapperError::InternalError(e.to_string()))?;

        let mut docs = Self::default();
        let mut current: Option<String> = None;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.contains("Table:") || line.contains(" - ") {
                if let Some(caps) = table_re.captures(line) {
                    let name = caps[1].to_string();
                    tracing::debug!(table = %name, description = &caps[2], "Found table");
                    docs.tables.insert(
                        name.clone(),
                        TableDoc {
                            description: caps[2].trim().to_string(),
                            columns: BTreeMap::new(),
                        },
                    );
                    current = Some(name);
                    continue;
                }
            }

            let Some(table) = current.as_ref().and_then(|t| docs.tables.get_mut(t)) else {
                continue;
            };
            let Some(caps) = column_re.captures(line) else {
                continue;
            };
            let prefix = &caps[1];
            let description = caps[3].trim().to_string();

            match caps.get(2) {
                Some(end) => {
                    // IREF01-05 -> IREF01..IREF05, keeping the start's zero padding
                    let Some(parts) = range_re.captures(prefix) else {
                        continue;
                    };
                    let base = &parts[1];
                    let start_str = &parts[2];
                    let width = start_str.len();
                    let (Ok(start), Ok(end)) = (start_str.parse::<u32>(), end.as_str().parse::<u32>()) else {
                        tracing::warn!(line, "Skipping range with unparsable bounds");
                        continue;
                    };
                    if start > end {
                        tracing::warn!(line, start, end, "Skipping reversed column range");
                        continue;
                    }
                    if end - start >= MAX_RANGE_SPAN {
                        tracing::warn!(line, start, end, max = MAX_RANGE_SPAN, "Skipping oversized column range");
                        continue;
                    }
                    for n in start..=end {
                        table
                            .columns
                            .insert(format!("{}{:0width$}", base, n, width = width), description.clone());
                    }
                }
                None => {
                    table.columns.insert(prefix.to_string(), description);
                }
            }
        }

        Ok(docs)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&str> {
        self.tables.get(table)?.columns.get(column).map(String::as_str)
    }
}

/// New description text, or `None` when `addition` is already present.
pub fn merge_description(current: &str, addition: &str) -> Option<String> {
    let current = current.trim();
    if current.contains(addition) {
        return None;
    }
    if current.is_empty() || current.eq_ignore_ascii_case("nan") {
        Some(format!("{}: {}", DOCS_MARKER, addition))
    } else {
        Some(format!("{} | {}: {}", current, DOCS_MARKER, addition))
    }
}

/// Outcome of an enrichment run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichReport {
    pub files_updated: usize,
    pub columns_updated: usize,
    /// Table descriptions added to `bpcs_table_descriptions.json`
    pub tables_described: usize,
}

/// Merge column descriptions into one schema CSV, rewriting it in place.
///
/// Returns the number of rows changed. A missing `Description` column is
/// added; other columns are preserved as-is.
///
/// # Errors
///
/// Returns `MapperError::SchemaLoadError` if the file has no `Column Name` header
pub fn enrich_schema_file(path: &Path, docs: &TableDoc) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let column_idx = headers
        .iter()
        .position(|h| h.trim() == "Column Name")
        .ok_or_else(|| MapperError::SchemaLoadError(format!("{}: no 'Column Name' column", path.display())))?;
    let description_idx = match headers.iter().position(|h| h.trim() == "Description") {
        Some(idx) => idx,
        None => {
            headers.push("Description".to_string());
            headers.len() - 1
        }
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut updated = 0;
    for record in reader.records() {
        let mut row: Vec<String> = record?.iter().map(|c| c.to_string()).collect();
        row.resize(headers.len(), String::new());

        let column = row[column_idx].trim().to_string();
        if let Some(addition) = docs.columns.get(&column) {
            if let Some(merged) = merge_description(&row[description_idx], addition) {
                row[description_idx] = merged;
                updated += 1;
            }
        }
        rows.push(row);
    }

    if updated > 0 {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&headers)?;
        for row in &rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
    }
    Ok(updated)
}

/// Enrich every schema CSV under `schema_dir` whose table is documented and
/// add missing table descriptions.
///
/// Files that fail to parse are logged and skipped.
pub fn enrich_schemas(schema_dir: &Path, docs: &BpcsDocs, descriptions: &mut TableDescriptions) -> Result<EnrichReport> {
    let span = background_span(BackgroundJobType::DocsEnrichment, &schema_dir.display().to_string());
    let _guard = span.enter();

    let mut report = EnrichReport::default();
    for path in discover_schema_files(schema_dir, &[])? {
        let table = table_name_for(&path);
        let Some(table_doc) = docs.tables.get(&table) else {
            continue;
        };

        if descriptions.insert_missing(&table, &table_doc.description) {
            report.tables_described += 1;
        }

        match enrich_schema_file(&path, table_doc) {
            Ok(0) => tracing::info!(file = %path.display(), "No columns needed updates"),
            Ok(n) => {
                tracing::info!(file = %path.display(), columns = n, "Updated schema file");
                report.files_updated += 1;
                report.columns_updated += n;
            }
            Err(e) => tracing::error!(file = %path.display(), error = %e, "Error processing schema file"),
        }
    }

    record_background_metrics(Some(report.columns_updated), None, "success");
    Ok(report)
}
