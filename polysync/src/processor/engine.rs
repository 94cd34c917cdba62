use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, gauge};
use polysync_config::shared::ChangeProcessorConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::concurrency::jitter::{exponential_backoff, jittered};
use crate::error::{ErrorKind, SyncError, SyncResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{PROCESS_CHANGE_BEFORE_HANDLER, sync_fail_point};
use crate::metrics::{
    POLYSYNC_CHANGE_LOG_PENDING, POLYSYNC_CHANGES_FAILED_TOTAL, POLYSYNC_CHANGES_PROCESSED_TOTAL,
    TABLE_LABEL,
};
use crate::processor::handler::HandlerRegistry;
use crate::store::change_log::ChangeLogStore;
use crate::sync_error;
use crate::types::ChangeRecord;

/// Jitter applied to retry delays, in percent.
const RETRY_JITTER_PERCENT: u8 = 10;

/// Counts of one [`ChangeProcessor::process_pending`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub claimed: usize,
    /// Records handled and marked processed, including those without handler.
    pub processed: usize,
    /// Records of tables without handler, marked processed without side effects.
    pub skipped: usize,
    pub failed: usize,
    /// Failed records that reached the retry limit and are left for manual inspection.
    pub flagged: usize,
}

impl ProcessOutcome {
    fn merge(&mut self, other: ProcessOutcome) {
        self.claimed += other.claimed;
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.flagged += other.flagged;
    }
}

/// Returns how long a record that failed `retry_count` times waits before its next attempt.
pub fn retry_delay(config: &ChangeProcessorConfig, retry_count: u32) -> Duration {
    let delay = exponential_backoff(
        Duration::from_millis(config.retry_base_delay_ms),
        Duration::from_millis(config.retry_max_delay_ms),
        retry_count,
    );

    jittered(delay, RETRY_JITTER_PERCENT)
}

/// Dispatches captured changes to the handler of their table.
///
/// Records of one table are handled strictly in capture order. Tables are independent: they
/// are handled concurrently and a failing record of one table never delays another.
#[derive(Debug, Clone)]
pub struct ChangeProcessor<S> {
    store: S,
    handlers: Arc<HandlerRegistry>,
    config: ChangeProcessorConfig,
}

impl<S> ChangeProcessor<S>
where
    S: ChangeLogStore + Clone + Send + Sync + 'static,
{
    pub fn new(store: S, handlers: HandlerRegistry, config: ChangeProcessorConfig) -> Self {
        Self {
            store,
            handlers: Arc::new(handlers),
            config,
        }
    }

    pub fn config(&self) -> &ChangeProcessorConfig {
        &self.config
    }

    /// Claims up to `batch_size` records and handles them.
    ///
    /// A failing handler only affects its record: the failure is recorded with a retry delay
    /// and the next record is handled. Only change log errors fail the call; records left
    /// unmarked by such an error are claimed again once their lease expires.
    pub async fn process_pending(&self, batch_size: usize) -> SyncResult<ProcessOutcome> {
        let lease = Duration::from_millis(self.config.lease_ms);
        let changes = self
            .store
            .claim_pending(batch_size, self.config.max_retries, lease)
            .await?;

        let mut outcome = ProcessOutcome {
            claimed: changes.len(),
            ..Default::default()
        };
        if changes.is_empty() {
            return Ok(outcome);
        }

        debug!(claimed = changes.len(), "claimed change records");

        let results = join_all(
            group_by_table(changes)
                .into_iter()
                .map(|changes| self.process_table(changes)),
        )
        .await;

        let mut errors = Vec::new();
        for (table_outcome, error) in results {
            outcome.merge(table_outcome);
            if let Some(error) = error {
                errors.push(error);
            }
        }

        self.report_pending().await;

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(outcome)
    }

    /// Clears the retry state of a flagged record so it is handled again.
    pub async fn requeue(&self, id: Uuid) -> SyncResult<bool> {
        let requeued = self.store.requeue(id).await?;
        if requeued {
            warn!(change_id = %id, "change record requeued");
        }

        Ok(requeued)
    }

    /// Returns records that exhausted their retries.
    pub async fn flagged(&self, limit: usize) -> SyncResult<Vec<ChangeRecord>> {
        self.store.flagged(self.config.max_retries, limit).await
    }

    async fn report_pending(&self) {
        match self.store.pending_count(self.config.max_retries).await {
            Ok(pending) => gauge!(POLYSYNC_CHANGE_LOG_PENDING).set(pending as f64),
            Err(err) => debug!(error = %err.summary(), "failed to count pending changes"),
        }
    }

    /// Handles the records of one table in order, stopping at the first change log error.
    async fn process_table(&self, changes: Vec<ChangeRecord>) -> (ProcessOutcome, Option<SyncError>) {
        let mut outcome = ProcessOutcome::default();

        for change in changes {
            let result = match self.dispatch(&change).await {
                Ok(handled) => self.complete(&change, handled, &mut outcome).await,
                Err(err) => self.record_failure(&change, err, &mut outcome).await,
            };

            if let Err(err) = result {
                error!(
                    change_id = %change.id,
                    table = %change.table,
                    error = %err.summary(),
                    "failed to update change log"
                );
                return (outcome, Some(err));
            }
        }

        (outcome, None)
    }

    /// Runs the handler of the change's table. Returns `false` if the table has none.
    async fn dispatch(&self, change: &ChangeRecord) -> SyncResult<bool> {
        let Some(handler) = self.handlers.get(&change.table) else {
            return Ok(false);
        };

        #[cfg(feature = "failpoints")]
        sync_fail_point(PROCESS_CHANGE_BEFORE_HANDLER)?;

        handler.handle(change).await?;

        Ok(true)
    }

    async fn complete(
        &self,
        change: &ChangeRecord,
        handled: bool,
        outcome: &mut ProcessOutcome,
    ) -> SyncResult<()> {
        self.store.mark_processed(change.id).await?;

        outcome.processed += 1;
        if !handled {
            outcome.skipped += 1;
        }
        counter!(POLYSYNC_CHANGES_PROCESSED_TOTAL, TABLE_LABEL => change.table.clone())
            .increment(1);

        Ok(())
    }

    async fn record_failure(
        &self,
        change: &ChangeRecord,
        err: SyncError,
        outcome: &mut ProcessOutcome,
    ) -> SyncResult<()> {
        let delay = retry_delay(&self.config, change.retry_count);
        let delay = chrono::Duration::from_std(delay).map_err(|range_err| {
            sync_error!(
                ErrorKind::ConfigError,
                "Retry delay out of range",
                range_err.to_string()
            )
        })?;
        let message = err.summary();

        let retry_count = self
            .store
            .mark_failed(change.id, &message, Utc::now() + delay)
            .await?;

        outcome.failed += 1;
        counter!(POLYSYNC_CHANGES_FAILED_TOTAL, TABLE_LABEL => change.table.clone()).increment(1);

        if retry_count >= self.config.max_retries {
            outcome.flagged += 1;
            error!(
                change_id = %change.id,
                table = %change.table,
                retry_count,
                error = %message,
                "change record exhausted its retries and needs manual inspection"
            );
        } else {
            warn!(
                change_id = %change.id,
                table = %change.table,
                retry_count,
                error = %message,
                "change handler failed, will retry"
            );
        }

        Ok(())
    }
}

/// Splits records per table, keeping capture order within each table.
fn group_by_table(changes: Vec<ChangeRecord>) -> Vec<Vec<ChangeRecord>> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<ChangeRecord>> = Vec::new();

    for change in changes {
        let position = *positions.entry(change.table.clone()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[position].push(change);
    }

    groups
}
