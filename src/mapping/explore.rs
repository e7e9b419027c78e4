//! Planner-driven exploration of the schema documentation.
//!
//! Each iteration the model picks unprocessed schema files and proposes
//! search queries and keywords; their hybrid search hits become context for
//! the next iteration.

use crate::embeddings::RetryPolicy;
use crate::llm::{select_next_batch, BatchSelection, PlannerContext, TextGenerator};
use crate::mapping::template::MappingSheet;
use crate::store::{SearchHit, VectorSearchService};
use crate::telemetry::{background_span, record_background_metrics, BackgroundJobType};
use crate::types::Result;
use std::collections::HashSet;
use std::fmt::Write as _;
use tracing::Instrument;

/// Why exploration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The planner reported it was finished
    Done,
    /// The planner selected nothing new
    NoNewFiles,
    MaxIterations,
    /// The planner call or its JSON failed
    PlannerFailed,
}

/// One planner round.
#[derive(Debug, Clone)]
pub struct ExplorationStep {
    pub iteration: usize,
    pub selection: BatchSelection,
    /// Selected files that exist in the store and were not processed before
    pub new_files: Vec<String>,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone)]
pub struct ExplorationOutcome {
    pub steps: Vec<ExplorationStep>,
    pub processed_files: Vec<String>,
    pub stop: StopReason,
}

/// Exploration loop over an indexed store.
pub struct Explorer<'a> {
    generator: &'a dyn TextGenerator,
    store: &'a VectorSearchService,
    max_iterations: usize,
    files_per_iteration: usize,
    hits_per_query: usize,
    retry: RetryPolicy,
}

impl<'a> Explorer<'a> {
    pub fn new(generator: &'a dyn TextGenerator, store: &'a VectorSearchService) -> Self {
        Self {
            generator,
            store,
            max_iterations: 5,
            files_per_iteration: 15,
            hits_per_query: 5,
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for planner calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_limits(mut self, max_iterations: usize, files_per_iteration: usize, hits_per_query: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self.files_per_iteration = files_per_iteration.max(1);
        self.hits_per_query = hits_per_query.max(1);
        self
    }

    /// Run until the planner is done, selects nothing new, or the iteration
    /// budget is spent.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::StorageError` if the store cannot list files or
    /// search; planner failures end the loop instead
    pub async fn run(&self, initial: &MappingSheet, current: &MappingSheet) -> Result<ExplorationOutcome> {
        let all_files = self.store.files()?;
        let known: HashSet<&str> = all_files.iter().map(String::as_str).collect();
        let initial_csv = initial.to_csv_string()?;
        let current_csv = current.to_csv_string()?;

        let mut processed: Vec<String> = Vec::new();
        let mut thoughts = String::new();
        let mut search_context = String::new();
        let mut steps = Vec::new();

        for iteration in 1..=self.max_iterations {
            let span = background_span(BackgroundJobType::Exploration, &format!("iteration {}", iteration));
            let ctx = PlannerContext {
                all_files: &all_files,
                processed_files: &processed,
                initial_csv: &initial_csv,
                current_csv: &current_csv,
                iteration,
                max_iterations: self.max_iterations,
                max_files: self.files_per_iteration,
                previous_thoughts: &thoughts,
                search_context: &search_context,
            };

            let selection = match select_next_batch(self.generator, &ctx, &self.retry).instrument(span.clone()).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(iteration, error = %e, "Planner failed");
                    return Ok(ExplorationOutcome {
                        steps,
                        processed_files: processed,
                        stop: StopReason::PlannerFailed,
                    });
                }
            };

            let new_files: Vec<String> = selection
                .files
                .iter()
                .filter(|f| known.contains(f.as_str()))
                .cloned()
                .collect();
            let hits = self.search(&selection).instrument(span.clone()).await?;

            span.in_scope(|| {
                tracing::info!(
                    iteration,
                    files = new_files.len(),
                    hits = hits.len(),
                    done = selection.done,
                    thoughts = %selection.thoughts,
                    "Exploration step"
                );
                record_background_metrics(Some(new_files.len()), None, "success");
            });

            search_context = render_hits(&hits);
            thoughts = selection.thoughts.clone();
            processed.extend(new_files.iter().cloned());

            let done = selection.done;
            let nothing_new = new_files.is_empty();
            steps.push(ExplorationStep {
                iteration,
                selection,
                new_files,
                hits,
            });

            if done {
                return Ok(ExplorationOutcome {
                    steps,
                    processed_files: processed,
                    stop: StopReason::Done,
                });
            }
            if nothing_new {
                return Ok(ExplorationOutcome {
                    steps,
                    processed_files: processed,
                    stop: StopReason::NoNewFiles,
                });
            }
        }

        Ok(ExplorationOutcome {
            steps,
            processed_files: processed,
            stop: StopReason::MaxIterations,
        })
    }

    /// Hybrid search per query; keyword-only search when no queries were given.
    async fn search(&self, selection: &BatchSelection) -> Result<Vec<SearchHit>> {
        let mut seen = HashSet::new();
        let mut hits = Vec::new();

        if selection.search_queries.is_empty() {
            if !selection.keywords.is_empty() && self.store.capabilities().full_text {
                hits = self.store.keyword_search(&selection.keywords, self.hits_per_query)?;
            }
            return Ok(hits);
        }

        for query in &selection.search_queries {
            for hit in self
                .store
                .hybrid_search(query, &selection.keywords, self.hits_per_query)
                .await?
            {
                if seen.insert(hit.document.id) {
                    hits.push(hit);
                }
            }
        }
        Ok(hits)
    }
}

/// One line per hit, for the next planner prompt.
pub fn render_hits(hits: &[SearchHit]) -> String {
    let mut text = String::new();
    for hit in hits {
        let _ = writeln!(text, "- [{}] {} (score {:.3})", hit.document.file_path, hit.document.text, hit.score);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoredDocument;

    #[test]
    fn test_render_hits() {
        let hits = vec![SearchHit {
            document: StoredDocument {
                id: 1,
                file_path: "AVM_Schema_Enriched.csv".to_string(),
                text: "Table: AVM | Column: VNDNAM".to_string(),
                payload: serde_json::Value::Null,
            },
            score: 0.5,
        }];
        assert_eq!(
            render_hits(&hits),
            "- [AVM_Schema_Enriched.csv] Table: AVM | Column: VNDNAM (score 0.500)\n"
        );
    }
}
