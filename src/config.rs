//! Data directory layout and runtime settings.
//!
//! Everything hangs off `DATA_STORAGE_PATH`:
//!
//! ```text
//! $DATA_STORAGE_PATH/
//! ├── FBDI Template/                 target templates (CSV)
//! ├── BPCS Data/                     *_Schema_Enriched.csv files
//! ├── Database/vector_store.db       SQLite vector store
//! ├── Mapped CSV/                    progress + final mapping output
//! └── bpcs_table_descriptions.json   table name -> description
//! ```

use crate::embeddings::{GeminiEmbedder, RetryPolicy};
use crate::types::{MapperError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default Gemini REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default generation model.
pub const DEFAULT_LLM_MODEL: &str = "gemini-3-pro-preview";

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-001";

/// Resolved locations of every input and output.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPaths {
    pub base: PathBuf,
    pub fbdi_template_dir: PathBuf,
    pub bpcs_data_dir: PathBuf,
    pub db_path: PathBuf,
    pub processed_dir: PathBuf,
    pub table_descriptions: PathBuf,
}

impl DataPaths {
    /// Derive the layout from a base directory.
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref().to_path_buf();
        Self {
            fbdi_template_dir: base.join("FBDI Template"),
            bpcs_data_dir: base.join("BPCS Data"),
            db_path: base.join("Database").join("vector_store.db"),
            processed_dir: base.join("Mapped CSV"),
            table_descriptions: base.join("bpcs_table_descriptions.json"),
            base,
        }
    }

    /// Layout rooted at `DATA_STORAGE_PATH` (default: current directory).
    pub fn from_env() -> Self {
        let base = std::env::var("DATA_STORAGE_PATH").unwrap_or_else(|_| ".".to_string());
        Self::new(shellexpand::tilde(&base).into_owned())
    }

    /// Override the database location.
    ///
    /// A directory argument resolves to `vector_store.db` inside it.
    pub fn with_db_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.db_path = Self::resolve_db_path(path);
        self
    }

    pub fn resolve_db_path<P: AsRef<Path>>(path: P) -> PathBuf {
        let path = path.as_ref();
        if path.is_dir() {
            path.join("vector_store.db")
        } else {
            path.to_path_buf()
        }
    }

    /// Knowledge base cache file.
    pub fn cache_file(&self) -> PathBuf {
        self.base.join("bpcs_knowledge_base.bin")
    }

    /// Create output and database directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.processed_dir)?;
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

/// Runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Gemini API key (`GEMINI_API_KEY`)
    pub api_key: Option<String>,

    /// REST endpoint (`MAPPER_API_BASE`)
    pub api_base: String,

    /// Generation model (`MAPPER_LLM_MODEL`)
    pub llm_model: String,

    /// Embedding model (`MAPPER_EMBEDDING_MODEL`)
    pub embedding_model: String,

    /// Embedding dimensionality, derived from the model
    pub vector_size: usize,

    /// Texts per embedding request
    pub embed_batch_size: usize,

    /// Embedding requests in flight during indexing
    pub max_concurrent_batches: usize,

    pub retry: RetryPolicy,

    /// Template rows per LLM decision call
    pub mapping_batch_size: usize,

    /// Candidates retrieved per target field
    pub candidates_per_field: usize,

    /// Alternatives written into the mapping logic
    pub alternatives_recorded: usize,

    /// Mapping logic characters shown to the refinement pass
    pub logic_snippet_chars: usize,

    /// Schema file prefixes to load (empty = all)
    pub schema_filter: Vec<String>,

    /// Exploration iterations
    pub max_iterations: usize,

    /// Files the planner may select per iteration
    pub files_per_iteration: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            vector_size: GeminiEmbedder::dimensions_for(DEFAULT_EMBEDDING_MODEL),
            embed_batch_size: 100,
            max_concurrent_batches: 4,
            retry: RetryPolicy::default(),
            mapping_batch_size: 5,
            candidates_per_field: 10,
            alternatives_recorded: 5,
            logic_snippet_chars: 1000,
            schema_filter: Vec::new(),
            max_iterations: 5,
            files_per_iteration: 15,
        }
    }
}

impl Settings {
    /// Build settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        settings.api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty());

        if let Ok(base) = std::env::var("MAPPER_API_BASE") {
            settings.api_base = base.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("MAPPER_LLM_MODEL") {
            settings.llm_model = model;
        }
        if let Ok(model) = std::env::var("MAPPER_EMBEDDING_MODEL") {
            settings.vector_size = GeminiEmbedder::dimensions_for(&model);
            settings.embedding_model = model;
        }
        if let Ok(filter) = std::env::var("MAPPER_SCHEMA_FILTER") {
            settings.schema_filter = parse_filter(&filter);
        }

        settings
    }

    /// API key or a configuration error.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::ConfigError` if `GEMINI_API_KEY` is not set
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            MapperError::ConfigError("GEMINI_API_KEY environment variable is not set.".to_string())
        })
    }

    /// Embedding client for the configured model and endpoint.
    pub fn embedder(&self) -> Result<GeminiEmbedder> {
        Ok(GeminiEmbedder::new(self.require_api_key()?.to_string(), &self.embedding_model)
            .with_api_base(&self.api_base)
            .with_dimensions(self.vector_size))
    }

    /// Validate numeric settings.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::ConfigError` naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("vector_size", self.vector_size),
            ("embed_batch_size", self.embed_batch_size),
            ("max_concurrent_batches", self.max_concurrent_batches),
            ("mapping_batch_size", self.mapping_batch_size),
            ("candidates_per_field", self.candidates_per_field),
            ("max_iterations", self.max_iterations),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(MapperError::ConfigError(format!("{} must be positive", name)));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(MapperError::ConfigError("retry.max_attempts must be positive".to_string()));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(MapperError::ConfigError(
                "retry.max_delay must not be smaller than retry.base_delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for tests and offline runs: no key, tiny vectors, no sleeping.
    pub fn offline(vector_size: usize) -> Self {
        Self {
            vector_size,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                jitter: false,
            },
            ..Self::default()
        }
    }
}

/// Split a comma-separated prefix list. Prefixes keep their case; matching
/// against file names is case-sensitive.
pub fn parse_filter(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = DataPaths::new("/data");
        assert_eq!(paths.bpcs_data_dir, PathBuf::from("/data/BPCS Data"));
        assert_eq!(paths.db_path, PathBuf::from("/data/Database/vector_store.db"));
        assert_eq!(paths.processed_dir, PathBuf::from("/data/Mapped CSV"));
        assert_eq!(paths.table_descriptions, PathBuf::from("/data/bpcs_table_descriptions.json"));
    }

    #[test]
    fn test_db_path_directory_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = DataPaths::resolve_db_path(dir.path());
        assert_eq!(resolved, dir.path().join("vector_store.db"));

        let file = dir.path().join("custom.db");
        assert_eq!(DataPaths::resolve_db_path(&file), file);
    }

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert_eq!(settings.vector_size, 3072);
        assert_eq!(settings.mapping_batch_size, 5);
        settings.validate().unwrap();
        assert!(Settings::offline(4).require_api_key().is_err());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let settings = Settings {
            embed_batch_size: 0,
            ..Settings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("embed_batch_size"));
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(parse_filter("avm, APH,,aty "), vec!["avm", "APH", "aty"]);
        assert!(parse_filter("").is_empty());
    }
}
