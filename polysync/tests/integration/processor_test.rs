use polysync::capture::CaptureProvisioner;
use polysync::clients::memory::{MemoryCache, MemoryEventBus, MemoryPrimaryStore, MemoryTableStore};
use polysync::processor::{
    CHECKSUM_HEADER, ChangeEnvelope, ChangeHandler, ChangeProcessor, HandlerRegistry,
    OPERATION_COLUMN, ProjectionHandler,
};
use polysync::store::both::memory::MemoryStore;
use polysync::test_utils::fixtures::{capture_config, row, user_row};
use polysync::test_utils::wrappers::RecordingHandler;
use polysync::transform::TableMapping;
use polysync_config::shared::ChangeProcessorConfig;
use polysync_telemetry::tracing::init_test_tracing;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn processor_config(max_retries: u32) -> ChangeProcessorConfig {
    ChangeProcessorConfig {
        max_retries,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 1,
        ..ChangeProcessorConfig::default()
    }
}

async fn captured_primary(tables: &[&str]) -> (MemoryStore, MemoryPrimaryStore) {
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let provisioner = CaptureProvisioner::new(primary.clone());
    for table in tables {
        provisioner.provision(&capture_config(table)).await.unwrap();
    }

    (store, primary)
}

/// Sleeps past the retry delay of failed records.
async fn wait_for_retry() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn projection_handler_updates_cache_columnar_and_events() {
    init_test_tracing();
    let (store, primary) = captured_primary(&["users"]).await;
    let cache = MemoryCache::new();
    let columnar = MemoryTableStore::new();
    let bus = MemoryEventBus::new();

    let handler = ProjectionHandler::new(["id"])
        .with_cache(Arc::new(cache.clone()), "users")
        .with_columnar(
            Arc::new(columnar.clone()),
            "users_changes",
            Arc::new(TableMapping::identity()),
        )
        .with_events(Arc::new(bus.clone()), "users.changes", "primary", 1);
    let mut handlers = HandlerRegistry::new();
    handlers.register("users", Arc::new(handler));
    let processor = ChangeProcessor::new(store.clone(), handlers, processor_config(3));

    primary.insert("users", user_row(1, "alice", 0)).await.unwrap();
    primary.update("users", user_row(1, "alicia", 5)).await.unwrap();
    primary.insert("users", user_row(2, "bob", 0)).await.unwrap();
    primary.delete("users", json!(2)).await.unwrap();

    let outcome = processor.process_pending(100).await.unwrap();
    assert_eq!(outcome.claimed, 4);
    assert_eq!(outcome.processed, 4);
    assert_eq!(outcome.failed, 0);

    // Deletes invalidate the cache entry.
    let entries = cache.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries["users:1"]["name"], json!("alicia"));

    // Deletes are kept as tombstones in the columnar projection.
    let projected = columnar.rows("users_changes").await;
    assert_eq!(projected.len(), 2);
    let tombstone = projected.iter().find(|row| row["id"] == json!(2)).unwrap();
    assert_eq!(tombstone[OPERATION_COLUMN], json!("DELETE"));

    let events = bus.events_for("users.changes").await;
    let keys: Vec<&str> = events.iter().map(|event| event.key.as_str()).collect();
    assert_eq!(keys, vec!["1", "1", "2", "2"]);
    for event in &events {
        let envelope: ChangeEnvelope = serde_json::from_slice(&event.payload).unwrap();
        assert!(envelope.verify_checksum().unwrap());
        assert_eq!(event.headers[CHECKSUM_HEADER], envelope.metadata.checksum);
        assert_eq!(envelope.metadata.source, "primary");
    }

    assert!(
        store
            .change_records()
            .await
            .iter()
            .all(|change| change.processed)
    );
}

#[tokio::test]
async fn tampered_envelope_fails_verification() {
    init_test_tracing();
    let (store, primary) = captured_primary(&["users"]).await;
    let bus = MemoryEventBus::new();
    let mut handlers = HandlerRegistry::new();
    handlers.register(
        "users",
        Arc::new(ProjectionHandler::new(["id"]).with_events(
            Arc::new(bus.clone()),
            "users.changes",
            "primary",
            1,
        )),
    );
    let processor = ChangeProcessor::new(store, handlers, processor_config(3));

    primary.insert("users", user_row(1, "alice", 0)).await.unwrap();
    processor.process_pending(10).await.unwrap();

    let event = &bus.events().await[0];
    let mut envelope: ChangeEnvelope = serde_json::from_slice(&event.payload).unwrap();
    envelope.new_record = Some(json!({"id": 1, "name": "mallory"}));

    assert!(!envelope.verify_checksum().unwrap());
}

#[tokio::test]
async fn changes_of_a_table_are_handled_in_capture_order() {
    init_test_tracing();
    let (store, primary) = captured_primary(&["users", "orders"]).await;
    let users = RecordingHandler::new();
    let orders = RecordingHandler::new();
    let mut handlers = HandlerRegistry::new();
    handlers.register("users", Arc::new(users.clone()));
    handlers.register("orders", Arc::new(orders.clone()));
    let processor = ChangeProcessor::new(store, handlers, processor_config(3));

    for id in 1..=5 {
        primary.insert("users", user_row(id, "user", id)).await.unwrap();
        primary
            .insert("orders", row(json!({"id": id, "total": id * 10})))
            .await
            .unwrap();
    }

    // Small batches force several claims.
    while processor.process_pending(3).await.unwrap().claimed > 0 {}

    let ids = |changes: Vec<polysync::types::ChangeRecord>| -> Vec<Value> {
        changes
            .into_iter()
            .map(|change| change.new_value.unwrap()["id"].clone())
            .collect()
    };
    let expected: Vec<Value> = (1..=5).map(Value::from).collect();
    assert_eq!(ids(users.handled().await), expected);
    assert_eq!(ids(orders.handled().await), expected);
}

#[tokio::test]
async fn failing_change_is_retried_without_blocking_other_tables() {
    init_test_tracing();
    let (store, primary) = captured_primary(&["users", "orders"]).await;
    let users = RecordingHandler::new();
    let orders = RecordingHandler::new();
    users.fail_next(1).await;
    let mut handlers = HandlerRegistry::new();
    handlers.register("users", Arc::new(users.clone()));
    handlers.register("orders", Arc::new(orders.clone()));
    let processor = ChangeProcessor::new(store.clone(), handlers, processor_config(3));

    primary.insert("users", user_row(1, "alice", 0)).await.unwrap();
    primary
        .insert("orders", row(json!({"id": 10, "total": 5})))
        .await
        .unwrap();

    let first = processor.process_pending(10).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.processed, 1);
    assert_eq!(orders.handled().await.len(), 1);

    let failed = store
        .change_records()
        .await
        .into_iter()
        .find(|change| change.table == "users")
        .unwrap();
    assert_eq!(failed.retry_count, 1);
    assert!(!failed.processed);
    assert!(failed.error_message.is_some());

    wait_for_retry().await;
    let second = processor.process_pending(10).await.unwrap();
    assert_eq!(second.processed, 1);

    let retried = store.change_record(failed.id).await.unwrap();
    assert!(retried.processed);
    assert!(retried.error_message.is_none());
}

#[tokio::test]
async fn exhausted_change_is_flagged_until_requeued() {
    init_test_tracing();
    let (store, primary) = captured_primary(&["users"]).await;
    let users = RecordingHandler::new();
    users.fail_next(usize::MAX).await;
    let mut handlers = HandlerRegistry::new();
    handlers.register("users", Arc::new(users.clone()));
    let processor = ChangeProcessor::new(store, handlers, processor_config(2));

    primary.insert("users", user_row(1, "alice", 0)).await.unwrap();

    assert_eq!(processor.process_pending(10).await.unwrap().flagged, 0);
    wait_for_retry().await;
    assert_eq!(processor.process_pending(10).await.unwrap().flagged, 1);
    wait_for_retry().await;
    assert_eq!(processor.process_pending(10).await.unwrap().claimed, 0);

    let flagged = processor.flagged(10).await.unwrap();
    assert_eq!(flagged.len(), 1);

    users.fail_next(0).await;
    assert!(processor.requeue(flagged[0].id).await.unwrap());

    let outcome = processor.process_pending(10).await.unwrap();
    assert_eq!(outcome.processed, 1);
    assert!(processor.flagged(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn tables_without_handler_are_marked_processed() {
    init_test_tracing();
    let (store, primary) = captured_primary(&["users"]).await;
    let processor = ChangeProcessor::new(store.clone(), HandlerRegistry::new(), processor_config(3));

    primary.insert("users", user_row(1, "alice", 0)).await.unwrap();

    let outcome = processor.process_pending(10).await.unwrap();
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.skipped, 1);
    assert!(store.change_records().await[0].processed);
}

#[tokio::test]
async fn replaying_a_change_converges_on_the_same_state() {
    init_test_tracing();
    let (store, primary) = captured_primary(&["users"]).await;
    let cache = MemoryCache::new();
    let columnar = MemoryTableStore::new();
    let handler = ProjectionHandler::new(["id"])
        .with_cache(Arc::new(cache.clone()), "users")
        .with_columnar(
            Arc::new(columnar.clone()),
            "users_changes",
            Arc::new(TableMapping::identity()),
        );

    primary.insert("users", user_row(1, "alice", 0)).await.unwrap();
    let change = store.change_records().await.remove(0);

    handler.handle(&change).await.unwrap();
    let cached = cache.entries().await;
    let projected = columnar.rows("users_changes").await;

    handler.handle(&change).await.unwrap();

    assert_eq!(cache.entries().await, cached);
    assert_eq!(columnar.rows("users_changes").await, projected);
}
