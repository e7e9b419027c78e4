//! Knowledge base builds against the on-disk embedding cache.

mod common;

use bpcs_mapper::knowledge::{clear_cache, KnowledgeBase};
use bpcs_mapper::{DataPaths, Settings};
use common::CountingEmbedder;
use std::fs;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

const DIMS: usize = 64;

const AVM: &str = "Column Name,Description,Label,Type,Sample Entry\n\
VNDNAM,Name of the vendor,Vendor Name,CHAR(30),ACME CORP\n\
VNDAD1,First address line,Vendor Address 1,CHAR(30),1 MAIN ST\n";

const APH: &str = "Column Name,Description,Label,Type,Sample Entry\n\
PHINV,Supplier invoice number,Invoice Number,CHAR(15),INV0001\n";

fn data_dir() -> (TempDir, DataPaths) {
    let dir = tempdir().unwrap();
    let paths = DataPaths::new(dir.path());
    fs::create_dir_all(&paths.bpcs_data_dir).unwrap();
    fs::write(paths.bpcs_data_dir.join("AVM_Schema_Enriched.csv"), AVM).unwrap();
    fs::write(paths.bpcs_data_dir.join("APH_Schema_Enriched.csv"), APH).unwrap();
    (dir, paths)
}

async fn build(paths: &DataPaths, settings: &Settings, embedder: &Arc<CountingEmbedder>) -> KnowledgeBase {
    KnowledgeBase::build(paths, settings, embedder.clone()).await.unwrap()
}

#[tokio::test]
async fn test_warm_build_reuses_cache() {
    let (_dir, paths) = data_dir();
    let settings = Settings::offline(DIMS);

    let cold = Arc::new(CountingEmbedder::new(DIMS, "hash-bow"));
    let kb = build(&paths, &settings, &cold).await;
    assert_eq!(kb.len(), 3);
    assert!(kb.is_vectorized());
    assert!(cold.calls() > 0);
    assert!(paths.cache_file().exists());

    let warm = Arc::new(CountingEmbedder::new(DIMS, "hash-bow"));
    let cached = build(&paths, &settings, &warm).await;
    assert_eq!(warm.calls(), 0);
    assert_eq!(cached.fields(), kb.fields());
    assert!(cached.is_vectorized());

    let hits = cached.search("Supplier invoice number", 1).await.unwrap();
    assert_eq!(hits[0].column, "PHINV");
}

#[tokio::test]
async fn test_changed_schema_file_invalidates_cache() {
    let (_dir, paths) = data_dir();
    let settings = Settings::offline(DIMS);
    build(&paths, &settings, &Arc::new(CountingEmbedder::new(DIMS, "hash-bow"))).await;

    let mut body = APH.to_string();
    body.push_str("PHVND,Vendor on the invoice,Vendor,CHAR(8),V0001\n");
    fs::write(paths.bpcs_data_dir.join("APH_Schema_Enriched.csv"), body).unwrap();

    let embedder = Arc::new(CountingEmbedder::new(DIMS, "hash-bow"));
    let kb = build(&paths, &settings, &embedder).await;
    assert!(embedder.calls() > 0);
    assert_eq!(kb.len(), 4);

    // The rebuilt cache is current again
    let again = Arc::new(CountingEmbedder::new(DIMS, "hash-bow"));
    build(&paths, &settings, &again).await;
    assert_eq!(again.calls(), 0);
}

#[tokio::test]
async fn test_changed_model_invalidates_cache() {
    let (_dir, paths) = data_dir();
    let settings = Settings::offline(DIMS);
    build(&paths, &settings, &Arc::new(CountingEmbedder::new(DIMS, "hash-bow"))).await;

    let other = Arc::new(CountingEmbedder::new(DIMS, "hash-bow-v2"));
    build(&paths, &settings, &other).await;
    assert!(other.calls() > 0);
}

#[tokio::test]
async fn test_schema_filter_bypasses_cache() {
    let (_dir, paths) = data_dir();
    let settings = Settings {
        schema_filter: vec!["AVM".to_string()],
        ..Settings::offline(DIMS)
    };

    let first = Arc::new(CountingEmbedder::new(DIMS, "hash-bow"));
    let kb = build(&paths, &settings, &first).await;
    assert_eq!(kb.len(), 2);
    assert_eq!(kb.tables().into_iter().collect::<Vec<_>>(), vec!["AVM".to_string()]);
    assert!(!paths.cache_file().exists());

    // A full cache on disk is not used for a filtered build either
    build(&paths, &Settings::offline(DIMS), &Arc::new(CountingEmbedder::new(DIMS, "hash-bow"))).await;
    assert!(paths.cache_file().exists());
    let second = Arc::new(CountingEmbedder::new(DIMS, "hash-bow"));
    let kb = build(&paths, &settings, &second).await;
    assert!(second.calls() > 0);
    assert_eq!(kb.len(), 2);
}

#[tokio::test]
async fn test_clear_cache_forces_rebuild() {
    let (_dir, paths) = data_dir();
    let settings = Settings::offline(DIMS);
    build(&paths, &settings, &Arc::new(CountingEmbedder::new(DIMS, "hash-bow"))).await;

    assert!(clear_cache(&paths).unwrap());
    assert!(!paths.cache_file().exists());
    assert!(!clear_cache(&paths).unwrap());

    let embedder = Arc::new(CountingEmbedder::new(DIMS, "hash-bow"));
    build(&paths, &settings, &embedder).await;
    assert!(embedder.calls() > 0);
}
