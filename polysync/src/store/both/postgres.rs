use chrono::{DateTime, Utc};
use polysync_config::shared::{IntoConnectOptions, PROCESSOR_CONNECTION_OPTIONS, PgConnectionConfig};
use polysync_postgres::change_log::{self, ChangeLogRow};
use polysync_postgres::history::{self, ReconciliationResultRow, SyncRunRow};
use polysync_postgres::watermark;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::store::change_log::ChangeLogStore;
use crate::store::state::SyncStateStore;
use crate::sync_error;
use crate::types::{ChangeRecord, ReconciliationResult, SyncRunState, SyncRunStatus};

/// Duration after which idle connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a lazily connected pool. No connection is opened until the first query.
fn create_database_pool(config: &PgConnectionConfig) -> PgPool {
    let options = config.with_db(Some(&*PROCESSOR_CONNECTION_OPTIONS));

    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(config.max_connections)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .connect_lazy_with(options)
}

fn to_i64(value: u64, field: &'static str) -> SyncResult<i64> {
    i64::try_from(value).map_err(|_| {
        sync_error!(
            ErrorKind::ConversionError,
            "Value does not fit a bigint column",
            format!("{field} = {value}")
        )
    })
}

fn to_u64(value: i64, field: &'static str) -> SyncResult<u64> {
    u64::try_from(value).map_err(|_| {
        sync_error!(
            ErrorKind::ConversionError,
            "Negative value in an unsigned field",
            format!("{field} = {value}")
        )
    })
}

fn to_i32(value: u32, field: &'static str) -> SyncResult<i32> {
    i32::try_from(value).map_err(|_| {
        sync_error!(
            ErrorKind::ConversionError,
            "Value does not fit an integer column",
            format!("{field} = {value}")
        )
    })
}

impl TryFrom<ChangeLogRow> for ChangeRecord {
    type Error = SyncError;

    fn try_from(row: ChangeLogRow) -> Result<Self, Self::Error> {
        let retry_count = u32::try_from(row.retry_count).map_err(|_| {
            sync_error!(
                ErrorKind::ConversionError,
                "Negative retry count in change log",
                format!("change {} has retry_count {}", row.id, row.retry_count)
            )
        })?;

        Ok(ChangeRecord {
            id: row.id,
            table: row.table_name,
            operation: row.operation.parse()?,
            old_value: row.old_record,
            new_value: row.new_record,
            captured_at: row.captured_at,
            source_transaction_id: row.transaction_id,
            processed: row.processed,
            error_message: row.error_message,
            retry_count,
        })
    }
}

impl TryFrom<SyncRunRow> for SyncRunStatus {
    type Error = SyncError;

    fn try_from(row: SyncRunRow) -> Result<Self, Self::Error> {
        let errors: Vec<String> = serde_json::from_value(row.errors)?;

        Ok(SyncRunStatus::restore(
            row.table_pair,
            row.started_at,
            to_u64(row.records_processed, "records_processed")?,
            errors,
            to_u64(row.duration_ms, "duration_ms")?,
            row.state.parse::<SyncRunState>()?,
        ))
    }
}

impl TryFrom<ReconciliationResultRow> for ReconciliationResult {
    type Error = SyncError;

    /// Orphan keys are not persisted, only their count.
    fn try_from(row: ReconciliationResultRow) -> Result<Self, Self::Error> {
        Ok(ReconciliationResult {
            source_table: row.source_table,
            destination_table: row.destination_table,
            source_count: to_u64(row.source_count, "source_count")?,
            destination_count: to_u64(row.destination_count, "destination_count")?,
            absolute_diff: to_u64(row.absolute_diff, "absolute_diff")?,
            percent_diff: row.percent_diff,
            orphans: Vec::new(),
            orphan_count: to_u64(row.orphan_count, "orphan_count")?,
            within_tolerance: row.within_tolerance,
            observed_at: row.observed_at,
        })
    }
}

fn rows_into<R, T>(rows: Vec<R>) -> SyncResult<Vec<T>>
where
    T: TryFrom<R, Error = SyncError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Postgres-backed change log and sync state, stored in the `polysync` schema of the primary
/// store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(config: &PgConnectionConfig) -> Self {
        Self {
            pool: create_database_pool(config),
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ChangeLogStore for PostgresStore {
    async fn claim_pending(
        &self,
        batch_size: usize,
        max_retries: u32,
        lease: Duration,
    ) -> SyncResult<Vec<ChangeRecord>> {
        let batch_size = to_i64(batch_size as u64, "batch_size")?;
        let max_retries = to_i32(max_retries, "max_retries")?;

        let rows =
            change_log::claim_pending_changes(&self.pool, batch_size, max_retries, lease).await?;
        debug!(claimed = rows.len(), "claimed change records");

        rows_into(rows)
    }

    async fn mark_processed(&self, id: Uuid) -> SyncResult<()> {
        change_log::mark_change_processed(&self.pool, id).await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> SyncResult<u32> {
        let retry_count =
            change_log::mark_change_failed(&self.pool, id, error_message, next_attempt_at).await?;

        u32::try_from(retry_count).map_err(|_| {
            sync_error!(
                ErrorKind::ConversionError,
                "Negative retry count in change log",
                format!("change {id} has retry_count {retry_count}")
            )
        })
    }

    async fn requeue(&self, id: Uuid) -> SyncResult<bool> {
        Ok(change_log::requeue_change(&self.pool, id).await?)
    }

    async fn flagged(&self, max_retries: u32, limit: usize) -> SyncResult<Vec<ChangeRecord>> {
        let rows = change_log::get_flagged_changes(
            &self.pool,
            to_i32(max_retries, "max_retries")?,
            to_i64(limit as u64, "limit")?,
        )
        .await?;

        rows_into(rows)
    }

    async fn pending_count(&self, max_retries: u32) -> SyncResult<u64> {
        let count =
            change_log::count_pending_changes(&self.pool, to_i32(max_retries, "max_retries")?)
                .await?;

        to_u64(count, "pending_count")
    }

    async fn purge_processed_before(&self, cutoff: DateTime<Utc>) -> SyncResult<u64> {
        Ok(change_log::delete_processed_changes_before(&self.pool, cutoff).await?)
    }
}

impl SyncStateStore for PostgresStore {
    async fn get_watermark(&self, table_pair: &str) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(watermark::get_watermark(&self.pool, table_pair).await?)
    }

    async fn advance_watermark(
        &self,
        table_pair: &str,
        value: DateTime<Utc>,
    ) -> SyncResult<DateTime<Utc>> {
        watermark::advance_watermark(&self.pool, table_pair, value)
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::WatermarkUpdateFailed,
                    "Failed to advance watermark",
                    format!("table pair {table_pair}: {err}"),
                    source: err
                )
            })
    }

    async fn record_sync_run(&self, run: SyncRunStatus) -> SyncResult<()> {
        let row = SyncRunRow {
            table_pair: run.table,
            started_at: run.started_at,
            records_processed: to_i64(run.records_processed, "records_processed")?,
            errors: serde_json::to_value(&run.errors)?,
            duration_ms: to_i64(run.duration_ms, "duration_ms")?,
            state: run.state.as_str().to_string(),
        };

        history::insert_sync_run(&self.pool, &row).await?;

        Ok(())
    }

    async fn latest_run(&self, table_pair: &str) -> SyncResult<Option<SyncRunStatus>> {
        history::get_latest_sync_run(&self.pool, table_pair)
            .await?
            .map(SyncRunStatus::try_from)
            .transpose()
    }

    async fn record_reconciliation(&self, result: ReconciliationResult) -> SyncResult<()> {
        let row = ReconciliationResultRow {
            source_table: result.source_table,
            destination_table: result.destination_table,
            source_count: to_i64(result.source_count, "source_count")?,
            destination_count: to_i64(result.destination_count, "destination_count")?,
            absolute_diff: to_i64(result.absolute_diff, "absolute_diff")?,
            percent_diff: result.percent_diff,
            orphan_count: to_i64(result.orphan_count, "orphan_count")?,
            within_tolerance: result.within_tolerance,
            observed_at: result.observed_at,
        };

        history::insert_reconciliation_result(&self.pool, &row).await?;

        Ok(())
    }

    async fn reconciliation_history(
        &self,
        source_table: &str,
        destination_table: &str,
        limit: usize,
    ) -> SyncResult<Vec<ReconciliationResult>> {
        let rows = history::get_reconciliation_history(
            &self.pool,
            source_table,
            destination_table,
            to_i64(limit as u64, "limit")?,
        )
        .await?;

        rows_into(rows)
    }
}
