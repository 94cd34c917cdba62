use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use std::fmt;
use std::future::Future;
use tracing::{error, info, warn};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::metrics::{POLYSYNC_SAGA_COMPENSATIONS_TOTAL, STORE_LABEL};
use crate::sync_error;

/// Future returned by a step operation or compensation.
pub type StepFuture = BoxFuture<'static, SyncResult<()>>;

type StepAction = Box<dyn FnOnce() -> StepFuture + Send>;

/// One write of a saga, optionally paired with the write undoing it.
pub struct TransactionStep {
    store_name: String,
    operation: StepAction,
    compensation: Option<StepAction>,
}

impl TransactionStep {
    pub fn new<F, Fut>(store_name: impl Into<String>, operation: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        Self {
            store_name: store_name.into(),
            operation: Box::new(move || operation().boxed()),
            compensation: None,
        }
    }

    pub fn with_compensation<F, Fut>(mut self, compensation: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        self.compensation = Some(Box::new(move || compensation().boxed()));
        self
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }
}

impl fmt::Debug for TransactionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStep")
            .field("store_name", &self.store_name)
            .field("compensable", &self.compensation.is_some())
            .finish()
    }
}

/// Runs `steps` in order, stopping at the first failure.
///
/// When a step fails, the compensations of the steps that completed run in reverse order. A
/// failing compensation does not stop the rollback. The error of the failed step is returned
/// alone if every compensation succeeded, otherwise together with the compensation errors.
pub async fn run_saga(steps: Vec<TransactionStep>) -> SyncResult<()> {
    let total = steps.len();
    let mut completed: Vec<(String, Option<StepAction>)> = Vec::with_capacity(total);

    for (index, step) in steps.into_iter().enumerate() {
        let TransactionStep {
            store_name,
            operation,
            compensation,
        } = step;

        match operation().await {
            Ok(()) => completed.push((store_name, compensation)),
            Err(err) => {
                error!(
                    step = index,
                    store = %store_name,
                    error = %err.summary(),
                    "saga step failed, rolling back completed steps"
                );

                let compensation_errors = compensate(completed).await;
                if compensation_errors.is_empty() {
                    return Err(err);
                }

                let mut errors = vec![err];
                errors.extend(compensation_errors);
                return Err(errors.into());
            }
        }
    }

    info!(steps = total, "saga completed");

    Ok(())
}

async fn compensate(completed: Vec<(String, Option<StepAction>)>) -> Vec<SyncError> {
    let mut errors = Vec::new();

    for (store_name, compensation) in completed.into_iter().rev() {
        let Some(compensation) = compensation else {
            warn!(store = %store_name, "saga step has no compensation, skipping");
            continue;
        };

        counter!(POLYSYNC_SAGA_COMPENSATIONS_TOTAL, STORE_LABEL => store_name.clone()).increment(1);

        if let Err(err) = compensation().await {
            error!(store = %store_name, error = %err.summary(), "saga compensation failed");
            errors.push(sync_error!(
                ErrorKind::CompensationFailed,
                "Saga compensation failed",
                format!("store `{store_name}`"),
                source: err
            ));
        }
    }

    errors
}
