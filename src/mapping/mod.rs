//! FBDI template mapping: sheet handling, the batch pipeline and
//! planner-driven exploration.

pub mod explore;
pub mod pipeline;
pub mod template;

pub use explore::{ExplorationOutcome, ExplorationStep, Explorer, StopReason};
pub use pipeline::{
    alternatives_text, apply_corrections, apply_decision, apply_decisions, export_path, review_rows, MappingPipeline,
    MappingSummary, PipelineOptions, PROGRESS_FILE,
};
pub use template::{MappingSheet, OUTPUT_COLUMNS};
