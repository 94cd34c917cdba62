use chrono::{DateTime, Utc};
use sqlx::{PgPool, prelude::FromRow};

/// A finished batch sync run as persisted in `polysync.sync_runs`.
#[derive(Debug, Clone, FromRow)]
pub struct SyncRunRow {
    pub table_pair: String,
    pub started_at: DateTime<Utc>,
    pub records_processed: i64,
    pub errors: serde_json::Value,
    pub duration_ms: i64,
    pub state: String,
}

/// A reconciliation observation as persisted in `polysync.reconciliation_results`.
#[derive(Debug, Clone, FromRow)]
pub struct ReconciliationResultRow {
    pub source_table: String,
    pub destination_table: String,
    pub source_count: i64,
    pub destination_count: i64,
    pub absolute_diff: i64,
    pub percent_diff: f64,
    pub orphan_count: i64,
    pub within_tolerance: bool,
    pub observed_at: DateTime<Utc>,
}

pub async fn insert_sync_run(pool: &PgPool, run: &SyncRunRow) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into polysync.sync_runs
            (table_pair, started_at, records_processed, errors, duration_ms, state)
        values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&run.table_pair)
    .bind(run.started_at)
    .bind(run.records_processed)
    .bind(&run.errors)
    .bind(run.duration_ms)
    .bind(&run.state)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_latest_sync_run(pool: &PgPool, table_pair: &str) -> sqlx::Result<Option<SyncRunRow>> {
    sqlx::query_as::<_, SyncRunRow>(
        r#"
        select table_pair, started_at, records_processed, errors, duration_ms, state
        from polysync.sync_runs
        where table_pair = $1
        order by started_at desc, id desc
        limit 1
        "#,
    )
    .bind(table_pair)
    .fetch_optional(pool)
    .await
}

pub async fn insert_reconciliation_result(
    pool: &PgPool,
    result: &ReconciliationResultRow,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into polysync.reconciliation_results
            (source_table, destination_table, source_count, destination_count, absolute_diff,
             percent_diff, orphan_count, within_tolerance, observed_at)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&result.source_table)
    .bind(&result.destination_table)
    .bind(result.source_count)
    .bind(result.destination_count)
    .bind(result.absolute_diff)
    .bind(result.percent_diff)
    .bind(result.orphan_count)
    .bind(result.within_tolerance)
    .bind(result.observed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Returns the most recent observations of a table pair, newest first.
pub async fn get_reconciliation_history(
    pool: &PgPool,
    source_table: &str,
    destination_table: &str,
    limit: i64,
) -> sqlx::Result<Vec<ReconciliationResultRow>> {
    sqlx::query_as::<_, ReconciliationResultRow>(
        r#"
        select source_table, destination_table, source_count, destination_count, absolute_diff,
               percent_diff, orphan_count, within_tolerance, observed_at
        from polysync.reconciliation_results
        where source_table = $1 and destination_table = $2
        order by observed_at desc, id desc
        limit $3
        "#,
    )
    .bind(source_table)
    .bind(destination_table)
    .bind(limit)
    .fetch_all(pool)
    .await
}
