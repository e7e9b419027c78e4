//! Schema CSV discovery and parsing.

use crate::types::{MapperError, Result, SchemaField};
use std::fs;
use std::path::{Path, PathBuf};

/// Suffix of enriched schema documentation files.
pub const SCHEMA_SUFFIX: &str = "_Schema_Enriched.csv";

/// Find `*_Schema_Enriched.csv` files under `dir`, recursively, sorted.
///
/// A non-empty `filter` keeps files whose name contains one of the prefixes.
///
/// # Errors
///
/// Returns `MapperError::SchemaLoadError` if `dir` does not exist
pub fn discover_schema_files(dir: &Path, filter: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(MapperError::SchemaLoadError(format!(
            "Schema directory not found: {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    collect(dir, &mut files)?;
    files.sort();

    if !filter.is_empty() {
        tracing::info!(filter = ?filter, "Applying schema filter");
        files.retain(|path| {
            let name = file_name(path);
            filter.iter().any(|prefix| name.contains(prefix.as_str()))
        });
    }

    tracing::info!(count = files.len(), "Found schema files");
    Ok(files)
}

fn collect(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect(&path, out)?;
        } else if file_name(&path).ends_with(SCHEMA_SUFFIX) {
            out.push(path);
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Table name encoded in a schema file name: the part before the first `_`.
pub fn table_name_for(path: &Path) -> String {
    let name = file_name(path);
    name.split('_').next().unwrap_or_default().to_string()
}

/// Parse one schema CSV.
///
/// Headers are trimmed and missing columns read as empty. Rows with more
/// fields than the header, or that the CSV reader cannot decode, are skipped
/// with a warning.
///
/// # Errors
///
/// Returns `MapperError::CsvError` if the file cannot be opened or has no header
pub fn load_schema_file(path: &Path) -> Result<Vec<SchemaField>> {
    let table = table_name_for(path);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h == name);
    let column_idx = position("Column Name");
    let description_idx = position("Description");
    let label_idx = position("Label");
    let type_idx = position("Type");
    let sample_idx = position("Sample Entry");

    let mut fields = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                skipped += 1;
                tracing::debug!(file = %path.display(), error = %e, "Skipping malformed row");
                continue;
            }
        };
        if record.len() > headers.len() {
            skipped += 1;
            tracing::debug!(
                file = %path.display(),
                fields = record.len(),
                expected = headers.len(),
                "Skipping row with extra fields"
            );
            continue;
        }
        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("").trim().to_string();

        fields.push(SchemaField::new(
            table.as_str(),
            cell(column_idx),
            cell(label_idx),
            cell(type_idx),
            cell(sample_idx),
            cell(description_idx),
        ));
    }

    if skipped > 0 {
        tracing::warn!(file = %path.display(), skipped, "Skipped malformed rows");
    }
    Ok(fields)
}

/// Load every file, tagging rows with their source path.
///
/// Unreadable files are logged and skipped.
pub fn load_schema_files(files: &[PathBuf]) -> Vec<(String, SchemaField)> {
    let mut rows = Vec::new();
    for path in files {
        match load_schema_file(path) {
            Ok(fields) => {
                let source = path.display().to_string();
                rows.extend(fields.into_iter().map(|f| (source.clone(), f)));
            }
            Err(e) => tracing::error!(file = %path.display(), error = %e, "Error reading schema file"),
        }
    }
    tracing::info!(fields = rows.len(), "Loaded schema fields");
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_discover_recurses_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("ap");
        fs::create_dir_all(&nested).unwrap();
        write(dir.path(), "AVM_Schema_Enriched.csv", "Column Name\n");
        write(&nested, "APH_Schema_Enriched.csv", "Column Name\n");
        write(dir.path(), "IIM_Schema_Enriched.csv", "Column Name\n");
        write(dir.path(), "notes.csv", "x\n");

        let all = discover_schema_files(dir.path(), &[]).unwrap();
        assert_eq!(all.len(), 3);

        let filtered = discover_schema_files(dir.path(), &["AVM".to_string(), "APH".to_string()]).unwrap();
        let mut names: Vec<String> = filtered.iter().map(|p| table_name_for(p)).collect();
        names.sort();
        assert_eq!(names, vec!["APH".to_string(), "AVM".to_string()]);

        let lowercase = discover_schema_files(dir.path(), &["avm".to_string()]).unwrap();
        assert!(lowercase.is_empty());
    }

    #[test]
    fn test_missing_directory_is_error() {
        let err = discover_schema_files(Path::new("/nonexistent/bpcs"), &[]).unwrap_err();
        assert!(matches!(err, MapperError::SchemaLoadError(_)));
    }

    #[test]
    fn test_load_trims_headers_and_tolerates_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "AVM_Schema_Enriched.csv",
            " Column Name , Description ,Label\nVNDNAM,Vendor name,Name\nVNDAD1,Address line 1\n",
        );

        let fields = load_schema_file(&path).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].table, "AVM");
        assert_eq!(fields[0].column, "VNDNAM");
        assert_eq!(fields[0].label, "Name");
        assert_eq!(fields[0].data_type, "");
        assert_eq!(fields[1].label, "");
        assert!(fields[1].full_text.starts_with("Table: AVM | Column: VNDAD1"));
    }

    #[test]
    fn test_rows_with_extra_fields_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "AVM_Schema_Enriched.csv",
            "Column Name,Description,Label\nVNDNAM,Vendor, name,Name\nVNDNUM,Vendor number,Number\n",
        );

        let fields = load_schema_file(&path).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].column, "VNDNUM");
        assert_eq!(fields[0].description, "Vendor number");
        assert_eq!(fields[0].label, "Number");
    }
}
