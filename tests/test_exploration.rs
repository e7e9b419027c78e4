//! Planner-driven exploration over an indexed store.

mod common;

use async_trait::async_trait;
use bpcs_mapper::llm::{Generation, TextGenerator};
use bpcs_mapper::mapping::{Explorer, MappingSheet, StopReason};
use bpcs_mapper::store::VectorSearchService;
use bpcs_mapper::types::{MapperError, Result};
use bpcs_mapper::Settings;
use common::{vendor_fields, HashEmbedder, Scripted};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

const DIMS: usize = 32;

async fn indexed_store() -> (TempDir, VectorSearchService) {
    let dir = tempdir().unwrap();
    let store = VectorSearchService::open(
        dir.path().join("store.db"),
        Arc::new(HashEmbedder { dims: DIMS }),
        &Settings::offline(DIMS),
    )
    .unwrap();
    let rows: Vec<(String, _)> = vendor_fields()
        .into_iter()
        .map(|f| (format!("{}_Schema_Enriched.csv", f.table), f))
        .collect();
    store.index_fields(&rows).await.unwrap();
    (dir, store)
}

fn sheet() -> MappingSheet {
    MappingSheet::from_parts(
        PathBuf::from("Supplier Import.csv"),
        vec!["FBDI Column Name".to_string()],
        vec![vec!["*Supplier Name".to_string()], vec!["Invoice Number".to_string()]],
    )
    .unwrap()
}

#[tokio::test]
async fn test_exploration_until_done() {
    let (_dir, store) = indexed_store().await;
    let planner = Scripted::new(&[
        r#"{"files": ["AVM_Schema_Enriched.csv", "NOPE_Schema_Enriched.csv"], "thoughts": "vendors first",
            "search_queries": ["supplier name"], "keywords": ["VNDNAM"], "done": false}"#,
        r#"{"files": ["AVM_Schema_Enriched.csv", "APH_Schema_Enriched.csv"], "thoughts": "invoices next",
            "keywords": ["PHINV"], "done": true}"#,
    ]);

    let initial = sheet();
    let outcome = Explorer::new(&planner, &store).run(&initial, &initial).await.unwrap();

    assert_eq!(outcome.stop, StopReason::Done);
    assert_eq!(outcome.steps.len(), 2);
    assert_eq!(outcome.steps[0].new_files, vec!["AVM_Schema_Enriched.csv"]);
    assert!(!outcome.steps[0].hits.is_empty());
    // Already processed files are filtered out of the second selection
    assert_eq!(outcome.steps[1].new_files, vec!["APH_Schema_Enriched.csv"]);
    assert_eq!(
        outcome.processed_files,
        vec!["AVM_Schema_Enriched.csv", "APH_Schema_Enriched.csv"]
    );

    let prompts = planner.prompts.lock().unwrap();
    assert!(prompts[0].contains("Iteration: 1/5"));
    assert!(prompts[0].contains("APH_Schema_Enriched.csv, AVM_Schema_Enriched.csv"));
    assert!(prompts[1].contains("vendors first"));
    assert!(prompts[1].contains("VNDNAM"));
}

#[tokio::test]
async fn test_exploration_stops_without_new_files() {
    let (_dir, store) = indexed_store().await;
    let planner = Scripted::new(&[r#"{"files": [], "thoughts": "nothing fits", "done": false}"#]);

    let initial = sheet();
    let outcome = Explorer::new(&planner, &store).run(&initial, &initial).await.unwrap();
    assert_eq!(outcome.stop, StopReason::NoNewFiles);
    assert_eq!(outcome.steps.len(), 1);
    assert!(outcome.processed_files.is_empty());
}

#[tokio::test]
async fn test_exploration_iteration_budget_and_planner_failure() {
    let (_dir, store) = indexed_store().await;
    let planner = Scripted::new(&[
        r#"{"files": ["AVM_Schema_Enriched.csv"], "thoughts": "one"}"#,
        r#"{"files": ["APH_Schema_Enriched.csv"], "thoughts": "two"}"#,
    ]);
    let initial = sheet();
    let outcome = Explorer::new(&planner, &store)
        .with_limits(2, 5, 3)
        .run(&initial, &initial)
        .await
        .unwrap();
    assert_eq!(outcome.stop, StopReason::MaxIterations);
    assert_eq!(outcome.processed_files.len(), 2);

    let silent = Scripted::new(&["I cannot help with that"]);
    let outcome = Explorer::new(&silent, &store).run(&initial, &initial).await.unwrap();
    assert_eq!(outcome.stop, StopReason::PlannerFailed);
    assert!(outcome.steps.is_empty());
}

/// Rate-limited once, then plans a single finished round.
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
            text: r#"{"files": ["AVM_Schema_Enriched.csv"], "thoughts": "vendors", "done": true}"#.to_string(),
            tokens: 3,
        })
    }

    fn model_name(&self) -> &str {
        "throttled"
    }
}

#[tokio::test]
async fn test_exploration_retries_rate_limited_planner() {
    let (_dir, store) = indexed_store().await;
    let planner = Throttled {
        calls: AtomicUsize::new(0),
    };
    let initial = sheet();

    let outcome = Explorer::new(&planner, &store)
        .with_retry(Settings::offline(DIMS).retry)
        .run(&initial, &initial)
        .await
        .unwrap();
    assert_eq!(outcome.stop, StopReason::Done);
    assert_eq!(outcome.processed_files, vec!["AVM_Schema_Enriched.csv"]);
    assert_eq!(planner.calls.load(Ordering::SeqCst), 2);
}
