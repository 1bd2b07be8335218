//! Tests for the on-disk checkpoint across engine instances.

mod common;

use assert_fs::prelude::*;
use common::{write_collection, CountingExtractor, CountingMetric};
use predicates::prelude::*;
use resumable_photo_dedup::core::checkpoint::{CheckpointStore, RunPhase, SqliteCheckpointStore};
use resumable_photo_dedup::{Engine, EngineConfig};
use std::path::Path;
use std::sync::Arc;

fn config(root: &Path, checkpoint: &Path) -> EngineConfig {
    EngineConfig::builder()
        .root(root)
        .worker_count(3)
        .checkpoint_path(checkpoint)
        .build()
        .unwrap()
}

#[test]
fn test_checkpoint_file_survives_engine_restart() {
    let photos = assert_fs::TempDir::new().unwrap();
    let state = assert_fs::TempDir::new().unwrap();
    write_collection(photos.path(), 12, 3);
    let checkpoint = state.child("checkpoint.db");

    let first = Engine::builder()
        .config(config(photos.path(), checkpoint.path()))
        .build()
        .unwrap()
        .run()
        .unwrap();

    checkpoint.assert(predicate::path::exists());
    assert!(first.is_complete());
    assert!(!first.resumed);

    let extractor = Arc::new(CountingExtractor::new());
    let metric = Arc::new(CountingMetric::new());
    let second = Engine::builder()
        .config(config(photos.path(), checkpoint.path()))
        .extractor(extractor.clone())
        .metric(metric.clone())
        .build()
        .unwrap()
        .run()
        .unwrap();

    assert!(second.resumed);
    assert_eq!(second.run_id, first.run_id);
    assert_eq!(extractor.calls(), 0);
    assert_eq!(metric.calls(), 0);
    assert_eq!(second.groups, first.groups);
}

#[test]
fn test_progress_readable_from_closed_checkpoint() {
    let photos = assert_fs::TempDir::new().unwrap();
    let state = assert_fs::TempDir::new().unwrap();
    write_collection(photos.path(), 5, 5);
    let checkpoint = state.child("checkpoint.db");

    Engine::builder()
        .config(config(photos.path(), checkpoint.path()))
        .build()
        .unwrap()
        .run()
        .unwrap();

    let store = SqliteCheckpointStore::open(checkpoint.path()).unwrap();
    let progress = Engine::progress_from_store(&store).unwrap();

    assert_eq!(progress.images_signed, 5);
    assert_eq!(progress.pairs_total, 10);
    assert_eq!(progress.pairs_resolved, 10);
    assert_eq!(progress.phase, RunPhase::Reported);

    let run_state = store.load_run_state().unwrap().unwrap();
    assert_eq!(run_state.phase, RunPhase::Reported);
}

#[test]
fn test_backup_copies_checkpoint() {
    let photos = assert_fs::TempDir::new().unwrap();
    let state = assert_fs::TempDir::new().unwrap();
    write_collection(photos.path(), 4, 2);
    let checkpoint = state.child("checkpoint.db");
    let backup = state.child("backup.db");

    Engine::builder()
        .config(config(photos.path(), checkpoint.path()))
        .build()
        .unwrap()
        .run()
        .unwrap();

    let store = SqliteCheckpointStore::open(checkpoint.path()).unwrap();
    store.backup(backup.path()).unwrap();
    backup.assert(predicate::path::exists());

    let restored = SqliteCheckpointStore::open(backup.path()).unwrap();
    assert_eq!(restored.images().unwrap().len(), 4);
    assert_eq!(
        restored.resolved_pairs().unwrap(),
        store.resolved_pairs().unwrap()
    );
}
