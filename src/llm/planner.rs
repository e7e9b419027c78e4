//! Next-batch planning for iterative documentation exploration.

use crate::embeddings::RetryPolicy;
use crate::llm::client::TextGenerator;
use crate::llm::extract::extract_object;
use crate::types::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// What the planner knows at the start of an iteration.
#[derive(Debug, Clone, Default)]
pub struct PlannerContext<'a> {
    pub all_files: &'a [String],
    pub processed_files: &'a [String],
    /// Template contents before any mapping
    pub initial_csv: &'a str,
    /// Template contents as mapped so far
    pub current_csv: &'a str,
    /// 1-based
    pub iteration: usize,
    pub max_iterations: usize,
    pub max_files: usize,
    pub previous_thoughts: &'a str,
    /// Rendered search hits from the previous iteration
    pub search_context: &'a str,
}

/// Planner answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchSelection {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub thoughts: String,
    /// Natural-language queries for vector search
    #[serde(default)]
    pub search_queries: Vec<String>,
    /// Codes and terms for keyword search
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub done: bool,
}

impl BatchSelection {
    /// Drop already-processed files, normalize separators and cap the count.
    pub fn sanitize(mut self, processed: &[String], max_files: usize) -> Self {
        let mut seen = std::collections::HashSet::new();
        self.files = self
            .files
            .into_iter()
            .map(|f| normalize_path(&f))
            .filter(|f| !processed.iter().any(|p| normalize_path(p) == *f))
            .filter(|f| seen.insert(f.clone()))
            .take(max_files)
            .collect();
        self
    }
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Build the planner prompt.
pub fn planner_prompt(ctx: &PlannerContext<'_>) -> String {
    let join = |files: &[String]| files.iter().map(|f| normalize_path(f)).collect::<Vec<_>>().join(", ");

    let mut prompt = String::new();
    let _ = write!(
        prompt,
        "You are iteratively searching BPCS schema documentation to complete a mapping CSV.\n\n\
         Iteration: {}/{}\n\n\
         Available schema files:\n{}\n\n\
         Already processed files:\n{}\n\n\
         Your previous thoughts:\n{}\n\n\
         Search hits from the last iteration:\n{}\n\n\
         Template before mapping:\n{}\n\n\
         Template as mapped so far:\n{}\n\n",
        ctx.iteration,
        ctx.max_iterations,
        join(ctx.all_files),
        join(ctx.processed_files),
        ctx.previous_thoughts,
        ctx.search_context,
        ctx.initial_csv,
        ctx.current_csv,
    );
    let _ = write!(
        prompt,
        "Pick up to {} files not yet processed that most likely fill the missing or low-confidence rows.\n\
         You may also propose:\n\
         - search_queries: short natural-language queries for semantic search\n\
         - keywords: column codes or exact terms for keyword search\n\
         Set done to true when nothing relevant remains.\n\n\
         Answer with a JSON object only:\n\
         {{\"files\": [\"...\"], \"thoughts\": \"...\", \"search_queries\": [\"...\"], \"keywords\": [\"...\"], \"done\": false}}\n",
        ctx.max_files
    );
    prompt
}

/// Ask the model for the next batch of files.
///
/// Recoverable API errors (rate limits, 5xx, timeouts) are retried under `retry`.
///
/// # Errors
///
/// Returns the generator's error once retries are spent, or
/// `MapperError::ExtractionError` if the answer holds no JSON object
pub async fn select_next_batch(
    generator: &dyn TextGenerator,
    ctx: &PlannerContext<'_>,
    retry: &RetryPolicy,
) -> Result<BatchSelection> {
    let prompt = planner_prompt(ctx);
    let prompt = prompt.as_str();
    let generation = retry
        .run("select_next_batch", move || async move { generator.generate(prompt).await })
        .await?;
    let selection: BatchSelection = extract_object(&generation.text)?;
    tracing::debug!(
        files = selection.files.len(),
        queries = selection.search_queries.len(),
        done = selection.done,
        tokens = generation.tokens,
        "Planner answered"
    );
    Ok(selection.sanitize(ctx.processed_files, ctx.max_files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::Generation;
    use crate::types::MapperError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Rate-limited on the first call, answers afterwards.
    struct Throttled {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for Throttled {
        async fn generate(&self, _prompt: &str) -> Result<Generation> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(MapperError::RateLimited("429: RESOURCE_EXHAUSTED".to_string()));
            }
            Ok(Generation {
                text: r#"{"files": ["AVM_Schema_Enriched.csv"], "thoughts": "vendors"}"#.to_string(),
                tokens: 3,
            })
        }

        fn model_name(&self) -> &str {
            "throttled"
        }
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    #[test]
    fn test_sanitize() {
        let selection = BatchSelection {
            files: vec![
                "BPCS Data\\AVM_Schema_Enriched.csv".to_string(),
                "BPCS Data/APH_Schema_Enriched.csv".to_string(),
                "BPCS Data/APH_Schema_Enriched.csv".to_string(),
                "BPCS Data/ATY_Schema_Enriched.csv".to_string(),
            ],
            ..BatchSelection::default()
        };
        let processed = vec!["BPCS Data/AVM_Schema_Enriched.csv".to_string()];

        let cleaned = selection.clone().sanitize(&processed, 15);
        assert_eq!(
            cleaned.files,
            vec!["BPCS Data/APH_Schema_Enriched.csv", "BPCS Data/ATY_Schema_Enriched.csv"]
        );
        assert_eq!(selection.sanitize(&processed, 1).files.len(), 1);
    }

    #[test]
    fn test_prompt_contents() {
        let all = vec!["a\\AVM_Schema_Enriched.csv".to_string()];
        let ctx = PlannerContext {
            all_files: &all,
            iteration: 2,
            max_iterations: 5,
            max_files: 15,
            ..PlannerContext::default()
        };
        let prompt = planner_prompt(&ctx);
        assert!(prompt.contains("Iteration: 2/5"));
        assert!(prompt.contains("a/AVM_Schema_Enriched.csv"));
        assert!(prompt.contains("up to 15 files"));
    }

    #[test]
    fn test_selection_defaults() {
        let selection: BatchSelection = extract_object("{\"done\": true}").unwrap();
        assert!(selection.done);
        assert!(selection.files.is_empty());
    }

    #[tokio::test]
    async fn test_select_next_batch_retries_rate_limit() {
        let generator = Throttled {
            calls: AtomicUsize::new(0),
        };
        let ctx = PlannerContext {
            max_files: 15,
            ..PlannerContext::default()
        };

        let selection = select_next_batch(&generator, &ctx, &no_wait()).await.unwrap();
        assert_eq!(selection.files, vec!["AVM_Schema_Enriched.csv"]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);

        let single = RetryPolicy {
            max_attempts: 1,
            ..no_wait()
        };
        let generator = Throttled {
            calls: AtomicUsize::new(0),
        };
        let err = select_next_batch(&generator, &ctx, &single).await.unwrap_err();
        assert!(err.is_rate_limit());
    }
}
