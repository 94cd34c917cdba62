//! Periodic tasks run by the sync context.

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, info};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::processor::ChangeProcessor;
use crate::reconcile::ReconciliationEngine;
use crate::store::change_log::ChangeLogStore;
use crate::store::state::SyncStateStore;
use crate::sync::BatchSyncEngine;
use crate::sync_error;
use crate::types::SyncRunState;
use crate::workers::base::WorkerType;
use crate::workers::periodic::PeriodicTask;

/// Handles one batch of pending change records per tick.
#[derive(Debug)]
pub struct ChangeProcessorTask<S> {
    processor: ChangeProcessor<S>,
    batch_size: usize,
}

impl<S> ChangeProcessorTask<S> {
    pub fn new(processor: ChangeProcessor<S>, batch_size: usize) -> Self {
        Self {
            processor,
            batch_size,
        }
    }
}

impl<S> PeriodicTask for ChangeProcessorTask<S>
where
    S: ChangeLogStore + Clone + Send + Sync + 'static,
{
    fn worker_type(&self) -> WorkerType {
        WorkerType::ChangeProcessor
    }

    async fn run_once(&mut self) -> SyncResult<()> {
        let outcome = self.processor.process_pending(self.batch_size).await?;
        if outcome.claimed > 0 {
            debug!(
                claimed = outcome.claimed,
                processed = outcome.processed,
                failed = outcome.failed,
                flagged = outcome.flagged,
                "processed change records"
            );
        }

        Ok(())
    }
}

/// Syncs every table pair per tick.
#[derive(Debug)]
pub struct BatchSyncTask<S> {
    engine: BatchSyncEngine<S>,
    batch_size: usize,
}

impl<S> BatchSyncTask<S> {
    pub fn new(engine: BatchSyncEngine<S>, batch_size: usize) -> Self {
        Self { engine, batch_size }
    }
}

impl<S> PeriodicTask for BatchSyncTask<S>
where
    S: SyncStateStore + Clone + Send + Sync + 'static,
{
    fn worker_type(&self) -> WorkerType {
        WorkerType::BatchSync
    }

    /// Fails if any pair failed. Failed runs are already recorded and their watermark kept,
    /// so the next tick resumes them.
    async fn run_once(&mut self) -> SyncResult<()> {
        let runs = self.engine.sync_all(self.batch_size).await?;

        let errors: Vec<SyncError> = runs
            .iter()
            .filter(|run| run.state == SyncRunState::Error)
            .map(|run| {
                sync_error!(
                    ErrorKind::SyncBatchFailed,
                    "Batch sync run failed",
                    format!("{}: {}", run.table, run.errors.join("; "))
                )
            })
            .collect();

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }
}

/// Validates every reconciliation pair per tick.
#[derive(Debug)]
pub struct ReconciliationTask<S> {
    engine: ReconciliationEngine<S>,
}

impl<S> ReconciliationTask<S> {
    pub fn new(engine: ReconciliationEngine<S>) -> Self {
        Self { engine }
    }
}

impl<S> PeriodicTask for ReconciliationTask<S>
where
    S: SyncStateStore + Clone + Send + Sync + 'static,
{
    fn worker_type(&self) -> WorkerType {
        WorkerType::Reconciliation
    }

    async fn run_once(&mut self) -> SyncResult<()> {
        let report = self.engine.validate_consistency().await;
        info!(
            pairs = report.results.len(),
            drifted = report.drifted(),
            failed = report.errors.len(),
            "reconciliation completed"
        );

        report.into_result().map(|_| ())
    }
}

/// Deletes processed change records older than a maximum age.
#[derive(Debug)]
pub struct RetentionTask<S> {
    store: S,
    max_age: ChronoDuration,
}

impl<S> RetentionTask<S> {
    pub fn new(store: S, max_age_hours: u64) -> Self {
        Self {
            store,
            max_age: i64::try_from(max_age_hours)
                .ok()
                .and_then(ChronoDuration::try_hours)
                .unwrap_or(ChronoDuration::MAX),
        }
    }
}

impl<S> PeriodicTask for RetentionTask<S>
where
    S: ChangeLogStore + Clone + Send + Sync + 'static,
{
    fn worker_type(&self) -> WorkerType {
        WorkerType::Retention
    }

    async fn run_once(&mut self) -> SyncResult<()> {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.max_age) else {
            return Ok(());
        };
        let purged = self.store.purge_processed_before(cutoff).await?;
        if purged > 0 {
            info!(purged, %cutoff, "purged processed change records");
        }

        Ok(())
    }
}
