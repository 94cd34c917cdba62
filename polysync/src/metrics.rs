//! Metric names emitted by the sync core.

/// Label for the table of a change or sync run.
pub const TABLE_LABEL: &str = "table";

/// Label for a source/destination table pair.
pub const TABLE_PAIR_LABEL: &str = "table_pair";

/// Label for a store name.
pub const STORE_LABEL: &str = "store";

/// Label for the outcome of a sync run.
pub const STATE_LABEL: &str = "state";

// Change processor metrics

/// Counter of change records handled successfully.
pub const POLYSYNC_CHANGES_PROCESSED_TOTAL: &str = "polysync_changes_processed_total";

/// Counter of failed change record attempts.
pub const POLYSYNC_CHANGES_FAILED_TOTAL: &str = "polysync_changes_failed_total";

/// Gauge of change records still eligible for processing.
pub const POLYSYNC_CHANGE_LOG_PENDING: &str = "polysync_change_log_pending";

// Batch sync metrics

/// Counter of rows written by batch sync.
pub const POLYSYNC_SYNC_ROWS_WRITTEN_TOTAL: &str = "polysync_sync_rows_written_total";

/// Histogram of batch sync run durations.
pub const POLYSYNC_SYNC_RUN_DURATION_SECONDS: &str = "polysync_sync_run_duration_seconds";

// Reconciliation metrics

/// Gauge of the latest observed drift of a table pair, in percent.
pub const POLYSYNC_RECONCILIATION_PERCENT_DIFF: &str = "polysync_reconciliation_percent_diff";

// Federated query and saga metrics

/// Counter of stores that failed or timed out during a federated query.
pub const POLYSYNC_FEDERATED_STORE_FAILURES_TOTAL: &str = "polysync_federated_store_failures_total";

/// Counter of compensations run by the transaction coordinator.
pub const POLYSYNC_SAGA_COMPENSATIONS_TOTAL: &str = "polysync_saga_compensations_total";
