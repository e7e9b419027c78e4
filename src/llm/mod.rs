//! LLM client, JSON extraction, mapping decisions and exploration planning.

pub mod client;
pub mod extract;
pub mod mapper;
pub mod planner;

pub use client::{GeminiClient, Generation, ModelInfo, TextGenerator};
pub use extract::{extract_array, extract_object, strip_markdown};
pub use mapper::{BatchItem, LlmMapper, ReviewRow, DEBUG_PROMPT_FILE};
pub use planner::{select_next_batch, BatchSelection, PlannerContext};
