//! Data types shared by the capture, processing, sync and query components.

mod change;
mod federated;
mod reconciliation;
mod sync_run;

pub use change::{ChangeRecord, Operation};
pub use federated::{
    CombineMode, FederatedQueryResult, FederatedQuerySpec, FederatedTarget, FederatedWarning,
    TargetRequest,
};
pub use reconciliation::ReconciliationResult;
pub use sync_run::{SyncRunState, SyncRunStatus};

/// A row exchanged with any store, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;
