use polysync::clients::memory::{MemoryPrimaryStore, MemoryTableStore};
use polysync::context::SyncContext;
use polysync::error::ErrorKind;
use polysync::store::both::memory::MemoryStore;
use polysync::store::state::SyncStateStore;
use polysync::test_utils::fixtures::{service_config, user_row};
use polysync::test_utils::wrappers::RecordingHandler;
use polysync::workers::base::WorkerType;
use polysync::workers::periodic::PeriodicWorkerState;
use polysync_config::shared::{ReconciliationPairConfig, ServiceConfig, TablePairConfig};
use polysync_telemetry::tracing::init_test_tracing;
use std::sync::Arc;

fn context(
    config: ServiceConfig,
) -> (
    SyncContext<MemoryStore, MemoryPrimaryStore>,
    MemoryStore,
    MemoryPrimaryStore,
) {
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let context = SyncContext::new(
        config,
        store.clone(),
        primary.clone(),
        Arc::new(primary.clone()),
    );

    (context, store, primary)
}

fn worker_state(
    context: &SyncContext<MemoryStore, MemoryPrimaryStore>,
    worker_type: WorkerType,
) -> PeriodicWorkerState {
    context
        .worker_states()
        .into_iter()
        .find(|(candidate, _)| *candidate == worker_type)
        .map(|(_, state)| state)
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn started_context_processes_captured_changes() {
    init_test_tracing();
    let handler = RecordingHandler::new();
    let (context, store, primary) = context(service_config(&["users"]));
    let mut context = context.with_handler("users", Arc::new(handler.clone()));

    context.start().await.unwrap();
    let handled = handler.notify_on_handled(3).await;
    for id in 1..=3 {
        primary.insert("users", user_row(id, "user", id)).await.unwrap();
    }
    handled.notified().await;

    context.shutdown_and_wait().await.unwrap();

    let changes = store.change_records().await;
    assert_eq!(changes.len(), 3);
    assert!(changes.iter().all(|change| change.processed));
}

#[tokio::test(flavor = "multi_thread")]
async fn context_cannot_be_started_twice() {
    init_test_tracing();
    let (mut context, _, _) = context(service_config(&["users"]));

    context.start().await.unwrap();
    let err = context.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    context.shutdown_and_wait().await.unwrap();
}

#[tokio::test]
async fn unregistered_destination_fails_before_workers_start() {
    init_test_tracing();
    let mut config = service_config(&["users"]);
    config.sync.pairs = vec![TablePairConfig::new("users", "users", "warehouse")];
    let (mut context, _, primary) = context(config);

    let err = context.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert!(context.worker_states().is_empty());
    // Capture was not provisioned either.
    primary.insert("users", user_row(1, "alice", 1)).await.unwrap();
    assert!(primary.change_log().change_records().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_and_reconciliation_workers_keep_the_projection_consistent() {
    init_test_tracing();
    let mut config = service_config(&["users"]);
    config.sync.pairs = vec![TablePairConfig::new("users", "users", "warehouse")];
    config.reconciliation.pairs = vec![ReconciliationPairConfig::new("users", "users", "warehouse")];
    let warehouse = MemoryTableStore::new();
    let (context, store, primary) = context(config);
    let mut context = context.with_destination("warehouse", Arc::new(warehouse.clone()));

    for id in 1..=4 {
        primary.insert("users", user_row(id, "user", id)).await.unwrap();
    }

    context.start().await.unwrap();
    let worker_types: Vec<_> = context
        .worker_states()
        .into_iter()
        .map(|(worker_type, _)| worker_type)
        .collect();
    assert_eq!(
        worker_types,
        vec![
            WorkerType::ChangeProcessor,
            WorkerType::BatchSync,
            WorkerType::Reconciliation,
            WorkerType::Retention,
        ]
    );

    worker_state(&context, WorkerType::BatchSync)
        .wait_for_runs(1)
        .await
        .unwrap();
    // A run started after the first sync finished observes the synced rows.
    let reconciliation = worker_state(&context, WorkerType::Reconciliation);
    let runs = reconciliation.progress().runs;
    reconciliation.wait_for_runs(runs + 2).await.unwrap();

    context.shutdown_and_wait().await.unwrap();

    assert_eq!(warehouse.rows("users").await.len(), 4);
    let history = store.reconciliation_history("users", "users", 1).await.unwrap();
    assert!(history[0].within_tolerance);
    assert_eq!(history[0].destination_count, 4);
}
