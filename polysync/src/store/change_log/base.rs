use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::error::SyncResult;
use crate::types::ChangeRecord;

/// Trait for reading and updating captured change records.
///
/// Records are appended by capture triggers. Implementations only mutate the processing
/// fields of a record and never delete unprocessed records.
///
/// Claims are leased: a claimed record is invisible to other claims until its lease expires
/// or it is marked processed or failed, so several processors can share one log.
pub trait ChangeLogStore {
    /// Claims up to `batch_size` unprocessed records, ordered by capture time.
    ///
    /// Records that reached `max_retries` attempts or whose retry delay has not elapsed are
    /// skipped.
    fn claim_pending(
        &self,
        batch_size: usize,
        max_retries: u32,
        lease: Duration,
    ) -> impl Future<Output = SyncResult<Vec<ChangeRecord>>> + Send;

    /// Marks a record processed and releases its lease.
    fn mark_processed(&self, id: Uuid) -> impl Future<Output = SyncResult<()>> + Send;

    /// Records a failed attempt, releases the lease and defers the next attempt.
    ///
    /// Returns the new retry count.
    fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> impl Future<Output = SyncResult<u32>> + Send;

    /// Resets the retry state of an unprocessed record so it is claimed again.
    ///
    /// Returns `false` if no unprocessed record has this id.
    fn requeue(&self, id: Uuid) -> impl Future<Output = SyncResult<bool>> + Send;

    /// Returns unprocessed records that exhausted their retries.
    fn flagged(
        &self,
        max_retries: u32,
        limit: usize,
    ) -> impl Future<Output = SyncResult<Vec<ChangeRecord>>> + Send;

    /// Counts unprocessed records still eligible for processing.
    fn pending_count(&self, max_retries: u32) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Deletes processed records captured before `cutoff` and returns how many were deleted.
    fn purge_processed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = SyncResult<u64>> + Send;
}
