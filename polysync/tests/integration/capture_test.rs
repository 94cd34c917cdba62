use polysync::capture::CaptureProvisioner;
use polysync::clients::memory::{MemoryPrimaryStore, RowWrite};
use polysync::error::ErrorKind;
use polysync::store::both::memory::MemoryStore;
use polysync::test_utils::fixtures::{capture_config, row, user_row};
use polysync::types::Operation;
use polysync_telemetry::tracing::init_test_tracing;
use serde_json::json;

#[tokio::test]
async fn writes_and_change_records_commit_together() {
    init_test_tracing();
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let provisioner = CaptureProvisioner::new(primary.clone());

    provisioner
        .provision(&capture_config("users").with_excluded_columns(["password_hash"]))
        .await
        .unwrap();

    let mut alice = user_row(1, "alice", 0);
    alice.insert("password_hash".to_string(), json!("secret"));
    primary
        .apply(vec![
            RowWrite::Insert {
                table: "users".to_string(),
                row: alice,
            },
            RowWrite::Insert {
                table: "users".to_string(),
                row: user_row(2, "bob", 0),
            },
        ])
        .await
        .unwrap();

    let changes = store.change_records().await;
    assert_eq!(changes.len(), 2);
    assert!(changes.iter().all(|change| change.operation == Operation::Insert));
    assert_eq!(
        changes[0].source_transaction_id,
        changes[1].source_transaction_id
    );
    let captured = changes[0].new_value.as_ref().unwrap();
    assert_eq!(captured["name"], json!("alice"));
    assert!(captured.get("password_hash").is_none());

    // The application row itself keeps every column.
    assert_eq!(primary.rows("users").await[0]["password_hash"], json!("secret"));
}

#[tokio::test]
async fn failed_transaction_leaves_no_change_records() {
    init_test_tracing();
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    CaptureProvisioner::new(primary.clone())
        .provision(&capture_config("users"))
        .await
        .unwrap();

    let err = primary
        .apply(vec![
            RowWrite::Insert {
                table: "users".to_string(),
                row: user_row(1, "alice", 0),
            },
            RowWrite::Insert {
                table: "users".to_string(),
                row: user_row(1, "alice again", 0),
            },
        ])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(primary.rows("users").await.is_empty());
    assert!(store.change_records().await.is_empty());
}

#[tokio::test]
async fn update_and_delete_carry_row_images() {
    init_test_tracing();
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    CaptureProvisioner::new(primary.clone())
        .provision(&capture_config("users"))
        .await
        .unwrap();

    primary.insert("users", user_row(1, "alice", 0)).await.unwrap();
    primary.update("users", user_row(1, "alicia", 5)).await.unwrap();
    primary.delete("users", json!(1)).await.unwrap();

    let changes = store.change_records().await;
    let operations: Vec<Operation> = changes.iter().map(|change| change.operation).collect();
    assert_eq!(
        operations,
        vec![Operation::Insert, Operation::Update, Operation::Delete]
    );

    let update = &changes[1];
    assert_eq!(update.old_value.as_ref().unwrap()["name"], json!("alice"));
    assert_eq!(update.new_value.as_ref().unwrap()["name"], json!("alicia"));

    let delete = &changes[2];
    assert!(delete.new_value.is_none());
    assert_eq!(delete.old_value.as_ref().unwrap()["name"], json!("alicia"));
}

#[tokio::test]
async fn uncaptured_and_deprovisioned_tables_are_not_recorded() {
    init_test_tracing();
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let provisioner = CaptureProvisioner::new(primary.clone());
    let users = capture_config("users");

    primary
        .insert("audit", row(json!({"id": 1, "event": "login"})))
        .await
        .unwrap();
    assert!(store.change_records().await.is_empty());

    provisioner.provision(&users).await.unwrap();
    assert!(provisioner.is_provisioned(&users).await.unwrap());

    provisioner.deprovision(&users).await.unwrap();
    assert!(!provisioner.is_provisioned(&users).await.unwrap());

    primary.insert("users", user_row(1, "alice", 0)).await.unwrap();
    assert!(store.change_records().await.is_empty());
}

#[tokio::test]
async fn provisioning_a_table_without_columns_fails() {
    init_test_tracing();
    let primary = MemoryPrimaryStore::new(MemoryStore::new());
    let provisioner = CaptureProvisioner::new(primary);
    let config = capture_config("users")
        .with_captured_columns(["email"])
        .with_excluded_columns(["email"]);

    let err = provisioner.provision(&config).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CaptureConfigurationFailed);
    assert!(!provisioner.is_provisioned(&config).await.unwrap());
}
