use polysync::bail;
use polysync::clients::memory::{MemoryCache, MemoryPrimaryStore, MemoryTableStore};
use polysync::clients::{BatchWriter, CacheClient};
use polysync::error::ErrorKind;
use polysync::saga::{TransactionStep, run_saga};
use polysync::store::both::memory::MemoryStore;
use polysync::test_utils::fixtures::user_row;
use polysync::test_utils::wrappers::FailingBatchWriter;
use polysync_telemetry::tracing::init_test_tracing;
use serde_json::{Value, json};

/// Writes a user to the primary store, the cache and the warehouse, undoing the first two
/// when a later write fails.
fn user_saga(
    primary: &MemoryPrimaryStore,
    cache: &MemoryCache,
    warehouse: &FailingBatchWriter,
) -> Vec<TransactionStep> {
    let user = user_row(1, "alice", 1);

    let insert_primary = {
        let (store, undo, row) = (primary.clone(), primary.clone(), user.clone());
        TransactionStep::new("primary", move || async move { store.insert("users", row).await })
            .with_compensation(move || async move { undo.delete("users", json!(1)).await })
    };

    let fill_cache = {
        let (client, undo, value) = (cache.clone(), cache.clone(), Value::Object(user.clone()));
        TransactionStep::new("cache", move || async move { client.set("users:1", value).await })
            .with_compensation(move || async move { undo.delete("users:1").await })
    };

    let project = {
        let writer = warehouse.clone();
        TransactionStep::new("warehouse", move || async move {
            writer.insert_batch("users", vec![user]).await
        })
    };

    vec![insert_primary, fill_cache, project]
}

#[tokio::test]
async fn completed_saga_leaves_every_store_written() {
    init_test_tracing();
    let primary = MemoryPrimaryStore::new(MemoryStore::new());
    let cache = MemoryCache::new();
    let warehouse = MemoryTableStore::new();
    let writer = FailingBatchWriter::new(warehouse.clone(), vec![]);

    run_saga(user_saga(&primary, &cache, &writer)).await.unwrap();

    assert_eq!(primary.rows("users").await.len(), 1);
    assert_eq!(cache.entries().await["users:1"]["name"], json!("alice"));
    assert_eq!(warehouse.rows("users").await.len(), 1);
}

#[tokio::test]
async fn failed_step_rolls_back_the_completed_ones() {
    init_test_tracing();
    let primary = MemoryPrimaryStore::new(MemoryStore::new());
    let cache = MemoryCache::new();
    let warehouse = MemoryTableStore::new();
    let writer = FailingBatchWriter::new(warehouse.clone(), vec![1]);

    let err = run_saga(user_saga(&primary, &cache, &writer))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationWriteFailed);
    assert!(primary.rows("users").await.is_empty());
    assert!(cache.entries().await.is_empty());
    assert!(warehouse.rows("users").await.is_empty());
}

#[tokio::test]
async fn failed_compensation_is_reported_with_the_step_error() {
    init_test_tracing();
    let primary = MemoryPrimaryStore::new(MemoryStore::new());
    let cache = MemoryCache::new();
    let writer = FailingBatchWriter::new(MemoryTableStore::new(), vec![1]);

    let mut steps = user_saga(&primary, &cache, &writer);
    // The primary write cannot be undone.
    steps[0] = {
        let store = primary.clone();
        TransactionStep::new("primary", move || async move {
            store.insert("users", user_row(1, "alice", 1)).await
        })
        .with_compensation(|| async {
            bail!(ErrorKind::PrimaryConnectionFailed, "Primary store is unreachable");
        })
    };

    let err = run_saga(steps).await.unwrap_err();

    assert_eq!(
        err.kinds(),
        vec![ErrorKind::DestinationWriteFailed, ErrorKind::CompensationFailed]
    );
    // The cache was still rolled back.
    assert!(cache.entries().await.is_empty());
    assert_eq!(primary.rows("users").await.len(), 1);
}
