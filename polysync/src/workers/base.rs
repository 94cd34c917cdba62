use std::fmt;
use std::future::Future;

use crate::error::SyncResult;

/// Classification of the background workers run by a sync context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WorkerType {
    /// Drains the change log into per-table handlers.
    ChangeProcessor,
    /// Copies rows newer than each pair's watermark.
    BatchSync,
    /// Compares counts and keys of table pairs.
    Reconciliation,
    /// Deletes old processed change records.
    Retention,
}

impl WorkerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChangeProcessor => "change_processor",
            Self::BatchSync => "batch_sync",
            Self::Reconciliation => "reconciliation",
            Self::Retention => "retention",
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A background worker.
///
/// `H` is the handle returned once the worker runs and `S` the state it exposes.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    type Error;

    /// Starts the worker in the background and returns its handle.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// Handle of a running worker.
pub trait WorkerHandle<S> {
    /// Returns a snapshot of the worker state. Holding it does not keep the worker alive.
    fn state(&self) -> S;

    /// Waits for the worker to stop and returns how it ended.
    fn wait(self) -> impl Future<Output = SyncResult<()>> + Send;
}
