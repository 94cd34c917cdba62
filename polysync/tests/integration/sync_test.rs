use polysync::clients::DestinationStore;
use polysync::clients::memory::{MemoryPrimaryStore, MemoryTableStore};
use polysync::error::ErrorKind;
use polysync::store::both::memory::MemoryStore;
use polysync::store::state::SyncStateStore;
use polysync::sync::{BatchSyncEngine, SyncPair};
use polysync::test_utils::fixtures::{timestamp, user_row};
use polysync::test_utils::wrappers::FailingBatchWriter;
use polysync::transform::TableMapping;
use polysync::types::SyncRunState;
use polysync_config::shared::TablePairConfig;
use polysync_telemetry::tracing::init_test_tracing;
use serde_json::json;
use std::sync::Arc;

const PAIR: &str = "users->warehouse.users";

fn users_pair() -> SyncPair {
    SyncPair::new(
        TablePairConfig::new("users", "users", "warehouse"),
        Arc::new(TableMapping::identity()),
    )
}

fn engine(
    store: &MemoryStore,
    primary: &MemoryPrimaryStore,
    destination: Arc<dyn DestinationStore>,
) -> BatchSyncEngine<MemoryStore> {
    BatchSyncEngine::new(store.clone(), Arc::new(primary.clone()))
        .with_destination("warehouse", destination)
        .with_pair(users_pair())
}

#[tokio::test]
async fn sync_copies_changed_rows_and_advances_the_watermark() {
    init_test_tracing();
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let warehouse = MemoryTableStore::new();
    let engine = engine(&store, &primary, Arc::new(warehouse.clone()));

    for id in 1..=3 {
        primary.insert("users", user_row(id, "user", id)).await.unwrap();
    }

    let run = engine.sync_pair(PAIR, 2).await.unwrap();
    assert_eq!(run.state, SyncRunState::Completed);
    assert_eq!(run.records_processed, 3);
    assert_eq!(warehouse.rows("users").await.len(), 3);
    assert_eq!(store.get_watermark(PAIR).await.unwrap(), Some(timestamp(3)));

    // Nothing changed since the watermark.
    let idle = engine.sync_pair(PAIR, 2).await.unwrap();
    assert_eq!(idle.records_processed, 0);

    primary.update("users", user_row(2, "renamed", 10)).await.unwrap();
    let incremental = engine.sync_pair(PAIR, 2).await.unwrap();
    assert_eq!(incremental.records_processed, 1);
    assert_eq!(store.get_watermark(PAIR).await.unwrap(), Some(timestamp(10)));

    let rows = warehouse.rows("users").await;
    assert_eq!(rows.len(), 3);
    let renamed = rows.iter().find(|row| row["id"] == json!(2)).unwrap();
    assert_eq!(renamed["name"], json!("renamed"));

    let latest = store.latest_run(PAIR).await.unwrap().unwrap();
    assert_eq!(latest.records_processed, 1);
}

#[tokio::test]
async fn failed_chunk_keeps_the_last_safe_watermark() {
    init_test_tracing();
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let warehouse = MemoryTableStore::new();
    // The second chunk write fails once.
    let writer = FailingBatchWriter::new(warehouse.clone(), vec![2]);
    let engine = engine(&store, &primary, Arc::new(writer.clone()));

    // Two rows share a timestamp across the chunk boundary.
    primary.insert("users", user_row(1, "a", 1)).await.unwrap();
    primary.insert("users", user_row(2, "b", 2)).await.unwrap();
    primary.insert("users", user_row(3, "c", 2)).await.unwrap();
    primary.insert("users", user_row(4, "d", 3)).await.unwrap();

    let failed = engine.sync_pair(PAIR, 2).await.unwrap();
    assert_eq!(failed.state, SyncRunState::Error);
    assert_eq!(failed.records_processed, 2);
    assert_eq!(failed.errors.len(), 1);
    // The first chunk ends inside the tie at timestamp 2, so only 1 is safe.
    assert_eq!(store.get_watermark(PAIR).await.unwrap(), Some(timestamp(1)));

    let retried = engine.sync_pair(PAIR, 2).await.unwrap();
    assert_eq!(retried.state, SyncRunState::Completed);
    assert_eq!(retried.records_processed, 3);
    assert_eq!(store.get_watermark(PAIR).await.unwrap(), Some(timestamp(3)));

    assert_eq!(warehouse.rows("users").await.len(), 4);
    assert_eq!(writer.calls(), 4);
}

#[tokio::test]
async fn transform_shapes_the_copied_rows() {
    init_test_tracing();
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let warehouse = MemoryTableStore::new();
    let pair = SyncPair::new(
        TablePairConfig::new("users", "users", "warehouse"),
        Arc::new(
            TableMapping::identity()
                .rename("name", "display_name")
                .constant("origin", json!("primary")),
        ),
    );
    let engine = BatchSyncEngine::new(store.clone(), Arc::new(primary.clone()))
        .with_destination("warehouse", Arc::new(warehouse.clone()))
        .with_pair(pair);

    primary.insert("users", user_row(1, "alice", 1)).await.unwrap();
    engine.sync_table("users", 10).await.unwrap();

    let rows = warehouse.rows("users").await;
    assert_eq!(rows[0]["display_name"], json!("alice"));
    assert_eq!(rows[0]["origin"], json!("primary"));
    assert!(rows[0].get("name").is_none());
}

#[tokio::test]
async fn unmapped_table_and_unknown_destination_are_reported() {
    init_test_tracing();
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let engine = BatchSyncEngine::new(store.clone(), Arc::new(primary.clone())).with_pair(users_pair());

    let err = engine.sync_table("orders", 10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingTableMapping);

    primary.insert("users", user_row(1, "alice", 1)).await.unwrap();
    let run = engine.sync_pair(PAIR, 10).await.unwrap();
    assert_eq!(run.state, SyncRunState::Error);
    assert_eq!(store.get_watermark(PAIR).await.unwrap(), None);
}

#[tokio::test]
async fn zero_batch_size_fails_the_run() {
    init_test_tracing();
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let engine = engine(&store, &primary, Arc::new(MemoryTableStore::new()));

    let run = engine.sync_pair(PAIR, 0).await.unwrap();

    assert_eq!(run.state, SyncRunState::Error);
    assert_eq!(run.records_processed, 0);
}
