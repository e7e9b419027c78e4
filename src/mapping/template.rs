//! FBDI template sheet: load, read targets, write mapping columns, save.

use crate::types::{FbdiField, MapperError, MappingRecord, Result};
use std::path::{Path, PathBuf};

pub const FBDI_COLUMN: &str = "FBDI Column Name";
pub const LEGACY_TABLE: &str = "Legacy Table Name";
pub const LEGACY_COLUMN: &str = "Legacy Column Name";
pub const LEGACY_DESCRIPTION: &str = "Legacy Field Description";
pub const MAPPING_LOGIC: &str = "Mapping Logic";
pub const CONFIDENCE: &str = "Confidence Score";

/// Columns appended to the template when absent.
pub const OUTPUT_COLUMNS: [&str; 5] = [LEGACY_TABLE, LEGACY_COLUMN, LEGACY_DESCRIPTION, MAPPING_LOGIC, CONFIDENCE];

/// The template as a grid of strings.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingSheet {
    source: PathBuf,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MappingSheet {
    /// Load a CSV template.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::TemplateError` for spreadsheets or when the
    /// `FBDI Column Name` column is missing
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let is_spreadsheet = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("xlsx") || e.eq_ignore_ascii_case("xls"));
        if is_spreadsheet {
            return Err(MapperError::TemplateError(format!(
                "{}: export the sheet to CSV first",
                path.display()
            )));
        }

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let rows = reader
            .records()
            .map(|r| r.map(|rec| rec.iter().map(str::to_string).collect()))
            .collect::<std::result::Result<Vec<Vec<String>>, csv::Error>>()?;

        Self::from_parts(path.to_path_buf(), headers, rows)
    }

    /// Build from headers and rows; output columns are appended and rows padded.
    pub fn from_parts(source: PathBuf, mut headers: Vec<String>, mut rows: Vec<Vec<String>>) -> Result<Self> {
        if !headers.iter().any(|h| h == FBDI_COLUMN) {
            return Err(MapperError::TemplateError(format!(
                "{}: required column '{}' not found",
                source.display(),
                FBDI_COLUMN
            )));
        }
        for column in OUTPUT_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                headers.push(column.to_string());
            }
        }
        for row in &mut rows {
            row.resize(headers.len(), String::new());
        }

        tracing::info!(path = %source.display(), rows = rows.len(), "Loaded FBDI template");
        Ok(Self { source, headers, rows })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Template file name without extension.
    pub fn stem(&self) -> String {
        self.source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mapping".to_string())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cell text; empty for unknown rows or columns.
    pub fn get(&self, row: usize, column: &str) -> &str {
        self.column_index(column)
            .and_then(|c| self.rows.get(row).and_then(|r| r.get(c)))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Set a cell, adding the column if needed. Unknown rows are ignored.
    pub fn set(&mut self, row: usize, column: &str, value: impl Into<String>) {
        let col = match self.column_index(column) {
            Some(c) => c,
            None => {
                self.headers.push(column.to_string());
                for r in &mut self.rows {
                    r.push(String::new());
                }
                self.headers.len() - 1
            }
        };
        if let Some(cells) = self.rows.get_mut(row) {
            cells[col] = value.into();
        }
    }

    pub fn contains_row(&self, row: usize) -> bool {
        row < self.rows.len()
    }

    /// Rows with a target name, in order.
    pub fn target_fields(&self) -> Vec<FbdiField> {
        (0..self.rows.len())
            .filter_map(|row| {
                let raw = self.get(row, FBDI_COLUMN).trim();
                if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
                    return None;
                }
                let name = raw.replace('*', "").trim().to_string();
                let description = self.get(row, "Field Description").trim().to_string();
                let data_type = self.get(row, "Data Type").trim().to_string();
                let tech_comments = self.get(row, "Tech Comments").trim();

                let query_text = [
                    self.get(row, "Oracle DB Table"),
                    name.as_str(),
                    self.get(row, "Oracle DB Column"),
                    description.as_str(),
                    tech_comments,
                    self.get(row, "Comments"),
                ]
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");

                Some(FbdiField {
                    row,
                    context: format!("Tech Comments: {}", tech_comments),
                    name,
                    description,
                    data_type,
                    query_text,
                })
            })
            .collect()
    }

    /// Mapping columns of one row.
    pub fn record(&self, row: usize) -> MappingRecord {
        let opt = |column: &str| Some(self.get(row, column).to_string()).filter(|s| !s.trim().is_empty());
        MappingRecord {
            target_field: self.get(row, FBDI_COLUMN).replace('*', "").trim().to_string(),
            legacy_table: opt(LEGACY_TABLE),
            legacy_column: opt(LEGACY_COLUMN),
            legacy_description: opt(LEGACY_DESCRIPTION),
            confidence: self.get(row, CONFIDENCE).trim().parse().ok(),
            logic: opt(MAPPING_LOGIC),
        }
    }

    pub fn records(&self) -> Vec<MappingRecord> {
        (0..self.rows.len()).map(|row| self.record(row)).collect()
    }

    /// Whole sheet as CSV text.
    pub fn to_csv_string(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| MapperError::ExportError(format!("CSV buffer error: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| MapperError::ExportError(e.to_string()))
    }

    /// Write the sheet to `path`, creating parent directories.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
