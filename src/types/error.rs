//! Error types for mapping operations.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `From` implementations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MapperError>;

/// Error type shared by the store, the API clients and the mapping pipeline.
#[derive(Error, Debug)]
pub enum MapperError {
    /// Missing or invalid configuration (API key, paths)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Embedding generation failed
    #[error("Embedding generation failed: {0}")]
    EmbeddingError(String),

    /// Remote API returned a non-success status
    #[error("API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// Remote API rejected the call for quota reasons (429 / RESOURCE_EXHAUSTED)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Text generation failed
    #[error("LLM call failed: {0}")]
    LlmError(String),

    /// No usable JSON could be extracted from an LLM response
    #[error("JSON extraction failed: {0}")]
    ExtractionError(String),

    /// Vector or keyword search failed
    #[error("Search failed: {0}")]
    SearchError(String),

    /// A schema CSV or documentation file could not be loaded
    #[error("Schema load failed: {0}")]
    SchemaLoadError(String),

    /// The FBDI template is malformed
    #[error("Template error: {0}")]
    TemplateError(String),

    /// Writing mapping output failed
    #[error("Export failed: {0}")]
    ExportError(String),

    /// Storage layer error (SQLite)
    #[error("Storage error: {0}")]
    StorageError(#[from] rusqlite::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Bincode serialization error (knowledge base cache)
    #[error("Bincode error: {0}")]
    BincodeError(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl MapperError {
    /// Build an error from a non-success HTTP status and its body.
    ///
    /// 429 responses and bodies carrying `RESOURCE_EXHAUSTED` become
    /// `RateLimited` so the retry loop can treat them uniformly.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
            Self::RateLimited(format!("{}: {}", status, body))
        } else {
            Self::ApiError { status, body }
        }
    }

    /// Check if error is recoverable.
    ///
    /// # Returns
    ///
    /// `true` if operation can be retried, `false` otherwise
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::ApiError { status, .. } => *status == 408 || *status >= 500,
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether this error came from quota exhaustion.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(MapperError::from_status(429, "slow down").is_rate_limit());
        assert!(MapperError::from_status(400, "{\"status\": \"RESOURCE_EXHAUSTED\"}").is_rate_limit());

        let server = MapperError::from_status(503, "unavailable");
        assert!(!server.is_rate_limit());
        assert!(server.is_recoverable());

        let client = MapperError::from_status(400, "bad request");
        assert!(!client.is_recoverable());
    }

    #[test]
    fn test_non_api_errors_are_fatal() {
        assert!(!MapperError::ConfigError("GEMINI_API_KEY".into()).is_recoverable());
        assert!(!MapperError::ExtractionError("no json".into()).is_recoverable());
        assert!(MapperError::RateLimited("quota".into()).is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = MapperError::from_status(500, "boom");
        assert_eq!(err.to_string(), "API error (500): boom");

        let err: MapperError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.to_string().starts_with("I/O error"));
    }
}
