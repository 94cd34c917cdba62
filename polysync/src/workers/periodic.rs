//! Timer driven workers.
//!
//! A [`PeriodicWorker`] runs its task once, sleeps a jittered interval and repeats until
//! shutdown is signaled. Shutdown is only observed between runs, so a run in flight always
//! finishes.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Instrument, error, info, warn};

use crate::concurrency::jitter::jittered;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::sync_error;
use crate::workers::base::{Worker, WorkerHandle, WorkerType};
use crate::workers::policy::{RetryDirective, build_error_handling_policy};

/// Work done on every tick of a [`PeriodicWorker`].
pub trait PeriodicTask: Send + 'static {
    fn worker_type(&self) -> WorkerType;

    fn run_once(&mut self) -> impl Future<Output = SyncResult<()>> + Send;
}

/// Counters of a periodic worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerProgress {
    pub runs: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

/// Observable state of a periodic worker.
#[derive(Debug, Clone)]
pub struct PeriodicWorkerState {
    progress: watch::Receiver<WorkerProgress>,
}

impl PeriodicWorkerState {
    pub fn progress(&self) -> WorkerProgress {
        self.progress.borrow().clone()
    }

    /// Waits until the worker finished at least `runs` runs.
    ///
    /// Fails if the worker stops before.
    pub async fn wait_for_runs(&self, runs: u64) -> SyncResult<()> {
        let mut progress = self.progress.clone();
        progress
            .wait_for(|progress| progress.runs >= runs)
            .await
            .map_err(|_| {
                sync_error!(
                    ErrorKind::InvalidState,
                    "Worker stopped before reaching the expected runs",
                    format!("expected {runs} runs")
                )
            })?;

        Ok(())
    }
}

#[derive(Debug)]
pub struct PeriodicWorkerHandle {
    worker_type: WorkerType,
    state: PeriodicWorkerState,
    handle: Option<JoinHandle<SyncResult<()>>>,
}

impl PeriodicWorkerHandle {
    pub fn worker_type(&self) -> WorkerType {
        self.worker_type
    }
}

impl WorkerHandle<PeriodicWorkerState> for PeriodicWorkerHandle {
    fn state(&self) -> PeriodicWorkerState {
        self.state.clone()
    }

    async fn wait(mut self) -> SyncResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        let worker_type = self.worker_type;
        handle.await.map_err(|err| {
            if err.is_cancelled() {
                sync_error!(
                    ErrorKind::WorkerCancelled,
                    "Worker was cancelled",
                    format!("{worker_type}: {err}")
                )
            } else {
                sync_error!(
                    ErrorKind::WorkerPanic,
                    "Worker panicked",
                    format!("{worker_type}: {err}")
                )
            }
        })??;

        Ok(())
    }
}

/// Runs a [`PeriodicTask`] on a jittered interval until shutdown.
#[derive(Debug)]
pub struct PeriodicWorker<T> {
    task: T,
    interval: Duration,
    jitter_percent: u8,
    shutdown_rx: ShutdownRx,
}

impl<T> PeriodicWorker<T>
where
    T: PeriodicTask,
{
    pub fn new(task: T, interval: Duration, jitter_percent: u8, shutdown_rx: ShutdownRx) -> Self {
        Self {
            task,
            interval,
            jitter_percent,
            shutdown_rx,
        }
    }

    async fn run(mut self, progress_tx: watch::Sender<WorkerProgress>) -> SyncResult<()> {
        let worker_type = self.task.worker_type();
        info!(interval_ms = self.interval.as_millis() as u64, "starting periodic worker");

        loop {
            if let Err(err) = self.task.run_once().await {
                progress_tx.send_modify(|progress| {
                    progress.runs += 1;
                    progress.failures += 1;
                    progress.last_error = Some(err.summary());
                });

                let policy = build_error_handling_policy(&err);
                match policy.retry_directive() {
                    RetryDirective::Timed => {
                        warn!(error = %err.summary(), "run failed, retrying on the next tick");
                    }
                    RetryDirective::Manual => {
                        error!(
                            error = %err.summary(),
                            solution = policy.solution().unwrap_or_default(),
                            "run failed and needs attention"
                        );
                    }
                    RetryDirective::NoRetry => {
                        error!(error = %err.summary(), "run failed, stopping worker");
                        return Err(err);
                    }
                }
            } else {
                progress_tx.send_modify(|progress| progress.runs += 1);
            }

            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    info!(worker = %worker_type, "periodic worker stopped due to shutdown");

                    return Ok(());
                }

                _ = sleep(jittered(self.interval, self.jitter_percent)) => {}
            }
        }
    }
}

impl<T> Worker<PeriodicWorkerHandle, PeriodicWorkerState> for PeriodicWorker<T>
where
    T: PeriodicTask,
{
    type Error = SyncError;

    async fn start(self) -> SyncResult<PeriodicWorkerHandle> {
        let worker_type = self.task.worker_type();
        let (progress_tx, progress_rx) = watch::channel(WorkerProgress::default());

        let span = tracing::info_span!("periodic_worker", worker = %worker_type);
        let handle = tokio::spawn(self.run(progress_tx).instrument(span));

        Ok(PeriodicWorkerHandle {
            worker_type,
            state: PeriodicWorkerState {
                progress: progress_rx,
            },
            handle: Some(handle),
        })
    }
}
