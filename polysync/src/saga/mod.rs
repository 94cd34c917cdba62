//! Ordered writes across stores with compensating rollback.

mod coordinator;

pub use coordinator::{StepFuture, TransactionStep, run_saga};
