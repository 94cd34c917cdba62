use polysync::clients::memory::{MemoryPrimaryStore, MemoryTableStore, MemoryVectorStore};
use polysync::context::SyncContext;
use polysync::error::ErrorKind;
use polysync::store::both::memory::MemoryStore;
use polysync::test_utils::fixtures::{row, service_config, user_row};
use polysync::types::{CombineMode, FederatedQuerySpec, FederatedTarget};
use polysync_config::shared::TablePairConfig;
use polysync_telemetry::tracing::init_test_tracing;
use serde_json::json;
use std::sync::Arc;

const PAIR: &str = "users->warehouse.users";

struct Stores {
    context: SyncContext<MemoryStore, MemoryPrimaryStore>,
    primary: MemoryPrimaryStore,
    warehouse: MemoryTableStore,
    vectors: MemoryVectorStore,
}

fn stores() -> Stores {
    let store = MemoryStore::new();
    let primary = MemoryPrimaryStore::new(store.clone());
    let warehouse = MemoryTableStore::new();
    let vectors = MemoryVectorStore::new();

    let mut config = service_config(&["users"]);
    config.sync.pairs = vec![TablePairConfig::new("users", "users", "warehouse")];

    let context = SyncContext::new(config, store, primary.clone(), Arc::new(primary.clone()))
        .with_destination("warehouse", Arc::new(warehouse.clone()))
        .with_query_store("primary", Arc::new(primary.clone()))
        .with_query_store("warehouse", Arc::new(warehouse.clone()))
        .with_vector_store("embeddings", Arc::new(vectors.clone()));

    Stores {
        context,
        primary,
        warehouse,
        vectors,
    }
}

fn both_stores(mode: CombineMode) -> FederatedQuerySpec {
    FederatedQuerySpec::new(
        "users",
        vec![
            FederatedTarget::store("primary"),
            FederatedTarget::store("warehouse"),
        ],
        mode,
    )
}

#[tokio::test]
async fn merge_prefers_the_most_recently_updated_row() {
    init_test_tracing();
    let stores = stores();
    stores.primary.insert("users", user_row(1, "alice", 1)).await.unwrap();
    stores.primary.insert("users", user_row(2, "bob", 1)).await.unwrap();
    stores.context.batch_sync().sync_pair(PAIR, 10).await.unwrap();

    // The primary moves ahead for one row, the warehouse for the other.
    stores.primary.update("users", user_row(1, "alicia", 5)).await.unwrap();
    stores.warehouse.seed("users", vec![user_row(2, "robert", 9)]).await;

    let result = stores
        .context
        .federated()
        .run_federated(&both_stores(CombineMode::Merge))
        .await
        .unwrap();

    assert_eq!(result.row_count, 2);
    assert_eq!(result.sources_queried, vec!["primary", "warehouse"]);
    assert!(result.warnings.is_empty());
    let name = |id: i64| {
        result
            .rows
            .iter()
            .find(|row| row["id"] == json!(id))
            .map(|row| row["name"].clone())
            .unwrap()
    };
    assert_eq!(name(1), json!("alicia"));
    assert_eq!(name(2), json!("robert"));
}

#[tokio::test]
async fn union_keeps_the_first_answer_per_identity() {
    init_test_tracing();
    let stores = stores();
    stores.primary.insert("users", user_row(1, "alice", 1)).await.unwrap();
    stores
        .warehouse
        .seed("users", vec![user_row(1, "stale", 9), user_row(3, "carol", 2)])
        .await;

    let result = stores
        .context
        .federated()
        .run_federated(&both_stores(CombineMode::Union))
        .await
        .unwrap();

    let names: Vec<_> = result.rows.iter().map(|row| row["name"].clone()).collect();
    assert_eq!(names, vec![json!("alice"), json!("carol")]);
}

#[tokio::test]
async fn join_widens_rows_with_columns_of_other_stores() {
    init_test_tracing();
    let stores = stores();
    stores.primary.insert("users", user_row(1, "alice", 1)).await.unwrap();
    stores
        .warehouse
        .seed("user_stats", vec![row(json!({"id": 1, "orders": 12, "name": "ignored"}))])
        .await;

    let spec = FederatedQuerySpec::new(
        "users",
        vec![
            FederatedTarget::store("primary"),
            FederatedTarget::with_query("warehouse", "user_stats", vec![]),
        ],
        CombineMode::Join,
    );
    let result = stores.context.federated().run_federated(&spec).await.unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["name"], json!("alice"));
    assert_eq!(result.rows[0]["orders"], json!(12));
}

#[tokio::test]
async fn similarity_results_combine_with_relational_rows() {
    init_test_tracing();
    let stores = stores();
    stores.primary.insert("users", user_row(1, "alice", 1)).await.unwrap();
    stores
        .vectors
        .insert("profiles", vec![1.0, 0.0], row(json!({"id": 1, "topic": "rust"})))
        .await;
    stores
        .vectors
        .insert("profiles", vec![0.0, 1.0], row(json!({"id": 2, "topic": "gardening"})))
        .await;

    let spec = FederatedQuerySpec::new(
        "users",
        vec![
            FederatedTarget::store("primary"),
            FederatedTarget::similarity("embeddings", "profiles", vec![0.9, 0.1], 1),
        ],
        CombineMode::Join,
    );
    let result = stores.context.federated().run_federated(&spec).await.unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["topic"], json!("rust"));
    assert!(result.rows[0]["score"].as_f64().unwrap() > 0.9);
}

#[tokio::test]
async fn unknown_and_mismatched_stores_degrade_to_warnings() {
    init_test_tracing();
    let stores = stores();
    stores.primary.insert("users", user_row(1, "alice", 1)).await.unwrap();

    let spec = FederatedQuerySpec::new(
        "users",
        vec![
            FederatedTarget::store("primary"),
            FederatedTarget::store("graph"),
            // A vector store cannot answer query text.
            FederatedTarget::store("embeddings"),
        ],
        CombineMode::Union,
    );
    let result = stores.context.federated().run_federated(&spec).await.unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(result.sources_queried, vec!["primary"]);
    let warned: Vec<_> = result.warnings.iter().map(|warning| warning.store.as_str()).collect();
    assert_eq!(warned, vec!["graph", "embeddings"]);
}

#[tokio::test]
async fn query_without_targets_is_rejected() {
    init_test_tracing();
    let stores = stores();

    let spec = FederatedQuerySpec::new("users", vec![], CombineMode::Union);
    let err = stores.context.federated().run_federated(&spec).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidData);
}
