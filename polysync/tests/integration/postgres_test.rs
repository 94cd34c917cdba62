use std::collections::HashSet;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use polysync::capture::CaptureProvisioner;
use polysync::clients::postgres::PostgresPrimaryStore;
use polysync::store::both::postgres::PostgresStore;
use polysync::store::change_log::ChangeLogStore;
use polysync::store::state::SyncStateStore;
use polysync::test_utils::database::spawn_primary_database;
use polysync::test_utils::fixtures::capture_config;
use polysync::types::Operation;
use polysync_postgres::test_utils::PgDatabase;
use polysync_telemetry::tracing::init_test_tracing;
use serde_json::json;

const LEASE: Duration = Duration::from_secs(60);

/// Spawns a primary database with capture installed on `users`.
async fn captured_database() -> Option<(PgDatabase, PostgresStore)> {
    let database = spawn_primary_database().await?;
    CaptureProvisioner::new(PostgresPrimaryStore::new(&database.config))
        .provision(&capture_config("users"))
        .await
        .unwrap();
    let store = PostgresStore::from_pool(database.pool.clone());

    Some((database, store))
}

#[tokio::test(flavor = "multi_thread")]
async fn committed_write_appends_one_change_record() {
    init_test_tracing();
    let Some((database, store)) = captured_database().await else {
        eprintln!("Skipping test: TESTS_DATABASE_HOST not set");
        return;
    };

    database
        .execute("insert into public.users (id, name) values (1, 'alice')")
        .await;

    let changes = store.claim_pending(10, 3, LEASE).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].table, "users");
    assert_eq!(changes[0].operation, Operation::Insert);
    assert!(changes[0].old_value.is_none());
    assert_eq!(changes[0].new_value.as_ref().unwrap()["name"], json!("alice"));
}

#[tokio::test(flavor = "multi_thread")]
async fn rolled_back_write_appends_no_change_record() {
    init_test_tracing();
    let Some((database, store)) = captured_database().await else {
        eprintln!("Skipping test: TESTS_DATABASE_HOST not set");
        return;
    };

    let mut transaction = database.pool.begin().await.unwrap();
    sqlx::query("insert into public.users (id, name) values (1, 'alice')")
        .execute(&mut *transaction)
        .await
        .unwrap();
    sqlx::query("update public.users set name = 'alicia' where id = 1")
        .execute(&mut *transaction)
        .await
        .unwrap();
    transaction.rollback().await.unwrap();

    assert_eq!(store.pending_count(3).await.unwrap(), 0);
    assert!(store.claim_pending(10, 3, LEASE).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_claims_never_share_a_record() {
    init_test_tracing();
    let Some((database, store)) = captured_database().await else {
        eprintln!("Skipping test: TESTS_DATABASE_HOST not set");
        return;
    };

    database
        .execute(
            "insert into public.users (id, name)
             select id, 'user_' || id from generate_series(1, 40) as id",
        )
        .await;

    let claims: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.claim_pending(15, 3, LEASE).await })
        })
        .collect();

    let mut claimed = Vec::new();
    for claim in claims {
        claimed.extend(claim.await.unwrap().unwrap().into_iter().map(|change| change.id));
    }

    let distinct: HashSet<_> = claimed.iter().copied().collect();
    assert_eq!(distinct.len(), claimed.len());
    assert_eq!(claimed.len(), 40);
}

#[tokio::test(flavor = "multi_thread")]
async fn watermark_never_moves_backwards() {
    init_test_tracing();
    let Some(database) = spawn_primary_database().await else {
        eprintln!("Skipping test: TESTS_DATABASE_HOST not set");
        return;
    };
    let store = PostgresStore::from_pool(database.pool.clone());
    let newer = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    assert_eq!(store.advance_watermark("users->warehouse.users", newer).await.unwrap(), newer);
    assert_eq!(store.advance_watermark("users->warehouse.users", older).await.unwrap(), newer);

    assert_eq!(
        store.get_watermark("users->warehouse.users").await.unwrap(),
        Some(newer)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn change_log_rejects_records_that_contradict_their_operation() {
    init_test_tracing();
    let Some(database) = spawn_primary_database().await else {
        eprintln!("Skipping test: TESTS_DATABASE_HOST not set");
        return;
    };

    // An insert carries no old row image.
    let result = sqlx::query(
        "insert into polysync.change_log (table_name, operation, old_record, new_record)
         values ('users', 'INSERT', '{\"id\": 1}', '{\"id\": 1}')",
    )
    .execute(&database.pool)
    .await;

    assert!(result.is_err());
}
