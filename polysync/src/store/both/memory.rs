use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ErrorKind, SyncResult};
use crate::store::change_log::ChangeLogStore;
use crate::store::state::SyncStateStore;
use crate::sync_error;
use crate::types::{ChangeRecord, ReconciliationResult, SyncRunStatus};

/// A change record plus the scheduling fields a processor never sees.
#[derive(Debug, Clone)]
struct ChangeLogEntry {
    record: ChangeRecord,
    next_attempt_at: Option<DateTime<Utc>>,
    claimed_until: Option<DateTime<Utc>>,
}

impl ChangeLogEntry {
    fn is_claimable(&self, max_retries: u32, now: DateTime<Utc>) -> bool {
        !self.record.processed
            && self.record.retry_count < max_retries
            && self.next_attempt_at.is_none_or(|at| at <= now)
            && self.claimed_until.is_none_or(|until| until < now)
    }
}

/// Inner state of [`MemoryStore`].
#[derive(Debug)]
struct Inner {
    /// Change log in append order.
    change_log: Vec<ChangeLogEntry>,
    watermarks: BTreeMap<String, DateTime<Utc>>,
    /// Append-only run history.
    sync_runs: Vec<SyncRunStatus>,
    /// Append-only reconciliation history.
    reconciliations: Vec<ReconciliationResult>,
}

/// In-memory change log and sync state.
///
/// [`MemoryStore`] implements both [`ChangeLogStore`] and [`SyncStateStore`] and is used by
/// tests and by the in-memory primary store, which appends captured changes to it.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let inner = Inner {
            change_log: Vec::new(),
            watermarks: BTreeMap::new(),
            sync_runs: Vec::new(),
            reconciliations: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Appends captured records to the change log.
    pub async fn append_changes(&self, records: Vec<ChangeRecord>) {
        let mut inner = self.inner.lock().await;
        inner
            .change_log
            .extend(records.into_iter().map(|record| ChangeLogEntry {
                record,
                next_attempt_at: None,
                claimed_until: None,
            }));
    }

    /// Returns a snapshot of every record in the change log, in capture order.
    pub async fn change_records(&self) -> Vec<ChangeRecord> {
        let inner = self.inner.lock().await;
        inner
            .change_log
            .iter()
            .map(|entry| entry.record.clone())
            .collect()
    }

    pub async fn change_record(&self, id: Uuid) -> Option<ChangeRecord> {
        let inner = self.inner.lock().await;
        inner
            .change_log
            .iter()
            .find(|entry| entry.record.id == id)
            .map(|entry| entry.record.clone())
    }

    /// Returns every recorded sync run of a table pair, oldest first.
    pub async fn sync_runs(&self, table_pair: &str) -> Vec<SyncRunStatus> {
        let inner = self.inner.lock().await;
        inner
            .sync_runs
            .iter()
            .filter(|run| run.table == table_pair)
            .cloned()
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn entry_mut(&mut self, id: Uuid) -> SyncResult<&mut ChangeLogEntry> {
        self.change_log
            .iter_mut()
            .find(|entry| entry.record.id == id)
            .ok_or_else(|| {
                sync_error!(
                    ErrorKind::InvalidState,
                    "Change record not found",
                    format!("no change record with id {id}")
                )
            })
    }
}

impl ChangeLogStore for MemoryStore {
    async fn claim_pending(
        &self,
        batch_size: usize,
        max_retries: u32,
        lease: Duration,
    ) -> SyncResult<Vec<ChangeRecord>> {
        let now = Utc::now();
        let claimed_until = now
            + chrono::Duration::from_std(lease).map_err(|err| {
                sync_error!(
                    ErrorKind::ConfigError,
                    "Invalid claim lease",
                    err.to_string()
                )
            })?;

        let mut inner = self.inner.lock().await;

        let mut candidates: Vec<usize> = inner
            .change_log
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_claimable(max_retries, now))
            .map(|(index, _)| index)
            .collect();
        // Stable sort keeps append order among equal capture times.
        candidates.sort_by_key(|index| inner.change_log[*index].record.captured_at);
        candidates.truncate(batch_size);

        let mut claimed = Vec::with_capacity(candidates.len());
        for index in candidates {
            let entry = &mut inner.change_log[index];
            entry.claimed_until = Some(claimed_until);
            claimed.push(entry.record.clone());
        }

        Ok(claimed)
    }

    async fn mark_processed(&self, id: Uuid) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entry_mut(id)?;
        entry.record.processed = true;
        entry.record.error_message = None;
        entry.claimed_until = None;

        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> SyncResult<u32> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entry_mut(id)?;
        entry.record.retry_count += 1;
        entry.record.error_message = Some(error_message.to_string());
        entry.next_attempt_at = Some(next_attempt_at);
        entry.claimed_until = None;

        Ok(entry.record.retry_count)
    }

    async fn requeue(&self, id: Uuid) -> SyncResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner
            .change_log
            .iter_mut()
            .find(|entry| entry.record.id == id && !entry.record.processed)
        else {
            return Ok(false);
        };

        entry.record.retry_count = 0;
        entry.record.error_message = None;
        entry.next_attempt_at = None;
        entry.claimed_until = None;

        Ok(true)
    }

    async fn flagged(&self, max_retries: u32, limit: usize) -> SyncResult<Vec<ChangeRecord>> {
        let inner = self.inner.lock().await;
        let mut flagged: Vec<ChangeRecord> = inner
            .change_log
            .iter()
            .filter(|entry| !entry.record.processed && entry.record.retry_count >= max_retries)
            .map(|entry| entry.record.clone())
            .collect();
        flagged.sort_by_key(|record| record.captured_at);
        flagged.truncate(limit);

        Ok(flagged)
    }

    async fn pending_count(&self, max_retries: u32) -> SyncResult<u64> {
        let inner = self.inner.lock().await;
        let count = inner
            .change_log
            .iter()
            .filter(|entry| !entry.record.processed && entry.record.retry_count < max_retries)
            .count();

        Ok(count as u64)
    }

    async fn purge_processed_before(&self, cutoff: DateTime<Utc>) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.change_log.len();
        inner
            .change_log
            .retain(|entry| !(entry.record.processed && entry.record.captured_at < cutoff));

        Ok((before - inner.change_log.len()) as u64)
    }
}

impl SyncStateStore for MemoryStore {
    async fn get_watermark(&self, table_pair: &str) -> SyncResult<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().await;

        Ok(inner.watermarks.get(table_pair).copied())
    }

    async fn advance_watermark(
        &self,
        table_pair: &str,
        value: DateTime<Utc>,
    ) -> SyncResult<DateTime<Utc>> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .watermarks
            .entry(table_pair.to_string())
            .and_modify(|current| *current = (*current).max(value))
            .or_insert(value);

        Ok(*stored)
    }

    async fn record_sync_run(&self, run: SyncRunStatus) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.sync_runs.push(run);

        Ok(())
    }

    async fn latest_run(&self, table_pair: &str) -> SyncResult<Option<SyncRunStatus>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .sync_runs
            .iter()
            .rev()
            .find(|run| run.table == table_pair)
            .cloned())
    }

    async fn record_reconciliation(&self, result: ReconciliationResult) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.reconciliations.push(result);

        Ok(())
    }

    async fn reconciliation_history(
        &self,
        source_table: &str,
        destination_table: &str,
        limit: usize,
    ) -> SyncResult<Vec<ReconciliationResult>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .reconciliations
            .iter()
            .rev()
            .filter(|result| {
                result.source_table == source_table && result.destination_table == destination_table
            })
            .take(limit)
            .cloned()
            .collect())
    }
}
