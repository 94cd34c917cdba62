use polysync::clients::memory::{MemoryPrimaryStore, MemoryTableStore};
use polysync::error::ErrorKind;
use polysync::reconcile::ReconciliationEngine;
use polysync::store::both::memory::MemoryStore;
use polysync::sync::{BatchSyncEngine, SyncPair};
use polysync::test_utils::fixtures::{row, user_row};
use polysync::transform::TableMapping;
use polysync_config::shared::{ReconciliationConfig, ReconciliationPairConfig, TablePairConfig};
use polysync_telemetry::tracing::init_test_tracing;
use serde_json::json;
use std::sync::Arc;

fn reconciliation_config(pairs: Vec<ReconciliationPairConfig>) -> ReconciliationConfig {
    ReconciliationConfig {
        tolerance_percent: 5.0,
        pairs,
        ..ReconciliationConfig::default()
    }
}

#[tokio::test]
async fn synced_projection_is_consistent_until_the_source_diverges() {
    init_test_tracing();
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let warehouse = MemoryTableStore::new();

    for id in 1..=3 {
        primary.insert("users", user_row(id, "user", id)).await.unwrap();
    }
    BatchSyncEngine::new(store.clone(), Arc::new(primary.clone()))
        .with_destination("warehouse", Arc::new(warehouse.clone()))
        .with_pair(SyncPair::new(
            TablePairConfig::new("users", "users", "warehouse"),
            Arc::new(TableMapping::identity()),
        ))
        .sync_all(100)
        .await
        .unwrap();

    let pair = ReconciliationPairConfig::new("users", "users", "warehouse");
    let engine = ReconciliationEngine::new(
        store.clone(),
        Arc::new(primary.clone()),
        reconciliation_config(vec![pair.clone()]),
    )
    .with_destination("warehouse", Arc::new(warehouse.clone()));

    let consistent = engine.validate_pair(&pair).await.unwrap();
    assert!(consistent.within_tolerance);
    assert_eq!(consistent.percent_diff, 0.0);

    // A delete on the primary is not yet reflected in the projection.
    primary.delete("users", json!(3)).await.unwrap();

    let diverged = engine.validate_pair(&pair).await.unwrap();
    assert!(!diverged.within_tolerance);
    assert_eq!(diverged.source_count, 2);
    assert_eq!(diverged.destination_count, 3);
    assert_eq!(diverged.absolute_diff, 1);
    assert_eq!(diverged.orphans, vec![json!(3)]);

    let history = engine.history("users", "users", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(!history[0].within_tolerance);
    assert!(history[1].within_tolerance);
}

#[tokio::test]
async fn foreign_keys_are_checked_across_stores() {
    init_test_tracing();
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let documents = MemoryTableStore::new();

    primary.insert("users", user_row(1, "alice", 0)).await.unwrap();
    primary.insert("users", user_row(2, "bob", 0)).await.unwrap();
    documents
        .seed(
            "profiles",
            vec![
                row(json!({"id": "p1", "user_id": 1})),
                row(json!({"id": "p2", "user_id": "2"})),
                row(json!({"id": "p3", "user_id": 7})),
            ],
        )
        .await;

    let mut pair = ReconciliationPairConfig::new("users", "profiles", "documents");
    pair.foreign_key = "user_id".to_string();
    let mut config = reconciliation_config(vec![pair.clone()]);
    config.tolerance_percent = 100.0;
    let engine = ReconciliationEngine::new(store, Arc::new(primary), config)
        .with_destination("documents", Arc::new(documents));

    let result = engine.validate_pair(&pair).await.unwrap();

    // Textual and numeric ids match, only the dangling reference is reported.
    assert_eq!(result.orphans, vec![json!(7)]);
    assert_eq!(result.orphan_count, 1);
    assert!(!result.within_tolerance);
}

#[tokio::test]
async fn validate_consistency_reports_every_pair() {
    init_test_tracing();
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let warehouse = MemoryTableStore::new();
    primary.insert("users", user_row(1, "alice", 0)).await.unwrap();
    warehouse.seed("users", vec![user_row(1, "alice", 0)]).await;

    let engine = ReconciliationEngine::new(
        store.clone(),
        Arc::new(primary),
        reconciliation_config(vec![
            ReconciliationPairConfig::new("users", "users", "warehouse"),
            ReconciliationPairConfig::new("users", "users", "missing"),
        ]),
    )
    .with_destination("warehouse", Arc::new(warehouse));

    let report = engine.validate_consistency().await;
    assert_eq!(report.results.len(), 1);
    assert!(report.results[0].within_tolerance);
    let err = report.into_result().unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::StoreNotFound]);

    // The reachable pair is still recorded.
    assert_eq!(engine.history("users", "users", 10).await.unwrap().len(), 1);
}
