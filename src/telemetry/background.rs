//! Background job instrumentation.
//!
//! For long-running work like indexing, embedding batches and LLM passes.

use tracing::{field, span, Level, Span};

/// Background job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundJobType {
    /// Load schema CSVs and index them into the store
    IndexBuild,
    /// One embedding API batch
    EmbeddingBatch,
    /// Knowledge base cache write/read
    CacheSync,
    /// One LLM mapping decision batch
    MappingBatch,
    /// Review pass over all mappings
    Refinement,
    /// One planner iteration
    Exploration,
    /// Text documentation merge into schema CSVs
    DocsEnrichment,
}

impl BackgroundJobType {
    /// Get job type as string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IndexBuild => "index.build",
            Self::EmbeddingBatch => "embedding.batch",
            Self::CacheSync => "cache.sync",
            Self::MappingBatch => "mapping.batch",
            Self::Refinement => "mapping.refine",
            Self::Exploration => "explore.iteration",
            Self::DocsEnrichment => "docs.enrich",
        }
    }
}

/// Create background job span.
///
/// Metric fields are declared empty so `record_background_metrics` can fill them.
///
/// # Example
///
/// ```rust,ignore
/// let span = background_span(BackgroundJobType::IndexBuild, "BPCS Data");
/// let _guard = span.enter();
/// ```
pub fn background_span(job_type: BackgroundJobType, target: &str) -> Span {
    span!(
        Level::INFO,
        "background.job",
        job.type = job_type.as_str(),
        job.target = target,
        job.batch_size = field::Empty,
        job.duration_ms = field::Empty,
        job.status = field::Empty,
    )
}

/// Record background job metrics on the current span.
///
/// # Arguments
///
/// * `batch_size` - Number of items processed (optional)
/// * `duration_ms` - Processing duration in milliseconds (optional)
/// * `status` - Job status ("success", "failed", "partial")
pub fn record_background_metrics(batch_size: Option<usize>, duration_ms: Option<u64>, status: &str) {
    let span = Span::current();
    if let Some(size) = batch_size {
        span.record("job.batch_size", size);
    }
    if let Some(duration) = duration_ms {
        span.record("job.duration_ms", duration);
    }
    span.record("job.status", status);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_names() {
        assert_eq!(BackgroundJobType::IndexBuild.as_str(), "index.build");
        assert_eq!(BackgroundJobType::EmbeddingBatch.as_str(), "embedding.batch");
        assert_eq!(BackgroundJobType::Refinement.as_str(), "mapping.refine");
    }

    #[test]
    fn test_record_without_span_is_noop() {
        record_background_metrics(Some(3), Some(10), "success");
    }
}
