//! Logging setup and background job spans.
//!
//! # Span conventions
//!
//! Long-running work runs inside a `background.job` span:
//! - `job.type`: `index.build`, `embedding.batch`, `mapping.batch`, ...
//! - `job.target`: directory, template or table the job works on
//! - `job.batch_size`, `job.duration_ms`, `job.status`: recorded on completion
//!
//! # Example
//!
//! ```rust,ignore
//! use bpcs_mapper::telemetry::{background_span, record_background_metrics, BackgroundJobType};
//!
//! let span = background_span(BackgroundJobType::MappingBatch, "Supplier Bank Accounts");
//! let _guard = span.enter();
//! record_background_metrics(Some(5), None, "success");
//! ```

pub mod background;

pub use background::{background_span, record_background_metrics, BackgroundJobType};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// Filter comes from `RUST_LOG` (default `info`). Logs go to stderr so
/// stdout stays clean for command output.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init_logging(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if json {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
    };

    if result.is_ok() {
        tracing::debug!(json, "logging initialized");
    }
}
