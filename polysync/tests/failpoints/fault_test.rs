use polysync::capture::CaptureProvisioner;
use polysync::clients::memory::{MemoryPrimaryStore, MemoryTableStore};
use polysync::error::ErrorKind;
use polysync::failpoints::{
    PROCESS_CHANGE_BEFORE_HANDLER, PROVISION_BEFORE_INSTALL, SYNC_TABLE_BEFORE_CHUNK_WRITE,
};
use polysync::processor::{ChangeProcessor, HandlerRegistry};
use polysync::store::both::memory::MemoryStore;
use polysync::store::state::SyncStateStore;
use polysync::sync::{BatchSyncEngine, SyncPair};
use polysync::test_utils::failpoints::CustomFailScenario;
use polysync::test_utils::fixtures::{capture_config, timestamp, user_row};
use polysync::test_utils::wrappers::RecordingHandler;
use polysync::transform::TableMapping;
use polysync::types::SyncRunState;
use polysync_config::shared::{ChangeProcessorConfig, TablePairConfig};
use polysync_telemetry::tracing::init_test_tracing;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn failed_chunk_write_is_retried_from_the_stored_watermark() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(SYNC_TABLE_BEFORE_CHUNK_WRITE, "1*return->off")]);

    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let warehouse = MemoryTableStore::new();
    let pair = TablePairConfig::new("users", "users", "warehouse");
    let pair_name = pair.pair_name();
    let engine = BatchSyncEngine::new(store.clone(), Arc::new(primary.clone()))
        .with_destination("warehouse", Arc::new(warehouse.clone()))
        .with_pair(SyncPair::new(pair, Arc::new(TableMapping::identity())));

    for id in 1..=3 {
        primary.insert("users", user_row(id, "user", id)).await.unwrap();
    }

    let failed = engine.sync_pair(&pair_name, 10).await.unwrap();
    assert_eq!(failed.state, SyncRunState::Error);
    assert_eq!(failed.errors.len(), 1);
    assert!(warehouse.rows("users").await.is_empty());
    assert_eq!(store.get_watermark(&pair_name).await.unwrap(), None);

    let retried = engine.sync_pair(&pair_name, 10).await.unwrap();
    assert_eq!(retried.state, SyncRunState::Completed);
    assert_eq!(retried.records_processed, 3);
    assert_eq!(
        store.get_watermark(&pair_name).await.unwrap(),
        Some(timestamp(3))
    );
}

#[tokio::test]
async fn failure_before_the_handler_leaves_the_change_retryable() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(PROCESS_CHANGE_BEFORE_HANDLER, "1*return->off")]);

    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    CaptureProvisioner::new(primary.clone())
        .provision(&capture_config("users"))
        .await
        .unwrap();
    let handler = RecordingHandler::new();
    let mut handlers = HandlerRegistry::new();
    handlers.register("users", Arc::new(handler.clone()));
    let config = ChangeProcessorConfig {
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 1,
        ..ChangeProcessorConfig::default()
    };
    let processor = ChangeProcessor::new(store.clone(), handlers, config);

    primary.insert("users", user_row(1, "alice", 1)).await.unwrap();

    let first = processor.process_pending(10).await.unwrap();
    assert_eq!(first.failed, 1);
    assert!(handler.handled().await.is_empty());
    let change = store.change_records().await.remove(0);
    assert_eq!(change.retry_count, 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = processor.process_pending(10).await.unwrap();
    assert_eq!(second.processed, 1);
    assert_eq!(handler.handled().await.len(), 1);
    assert!(store.change_record(change.id).await.unwrap().processed);
}

#[tokio::test]
async fn failure_while_provisioning_is_a_capture_error() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(PROVISION_BEFORE_INSTALL, "return")]);

    let primary = MemoryPrimaryStore::new(MemoryStore::new());
    let provisioner = CaptureProvisioner::new(primary.clone());
    let config = capture_config("users");

    let err = provisioner.provision(&config).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CaptureConfigurationFailed);
    assert!(!provisioner.is_provisioned(&config).await.unwrap());
}
