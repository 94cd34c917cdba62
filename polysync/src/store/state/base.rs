use chrono::{DateTime, Utc};
use std::future::Future;

use crate::error::SyncResult;
use crate::types::{ReconciliationResult, SyncRunStatus};

/// Trait for sync watermarks and the history of sync and reconciliation runs.
///
/// A watermark is written by a single batch sync worker per table pair and may be read stale
/// by reconciliation.
pub trait SyncStateStore {
    /// Returns the watermark of a table pair, `None` if the pair never synced.
    fn get_watermark(
        &self,
        table_pair: &str,
    ) -> impl Future<Output = SyncResult<Option<DateTime<Utc>>>> + Send;

    /// Moves the watermark of a table pair forward and returns the stored value.
    ///
    /// The stored value never decreases.
    fn advance_watermark(
        &self,
        table_pair: &str,
        value: DateTime<Utc>,
    ) -> impl Future<Output = SyncResult<DateTime<Utc>>> + Send;

    /// Appends a finished run to the run history.
    fn record_sync_run(&self, run: SyncRunStatus) -> impl Future<Output = SyncResult<()>> + Send;

    /// Returns the most recent run of a table pair.
    fn latest_run(
        &self,
        table_pair: &str,
    ) -> impl Future<Output = SyncResult<Option<SyncRunStatus>>> + Send;

    /// Appends a reconciliation observation to the history.
    fn record_reconciliation(
        &self,
        result: ReconciliationResult,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Returns up to `limit` observations of a table pair, newest first.
    fn reconciliation_history(
        &self,
        source_table: &str,
        destination_table: &str,
        limit: usize,
    ) -> impl Future<Output = SyncResult<Vec<ReconciliationResult>>> + Send;
}
