use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of comparing one source table with its derived copy.
///
/// Drift and orphans are findings carried by this value; they are never raised as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub source_table: String,
    pub destination_table: String,
    pub source_count: u64,
    pub destination_count: u64,
    pub absolute_diff: u64,
    /// Drift relative to the source count, in percent.
    pub percent_diff: f64,
    /// Destination keys without a matching source row, capped at a fixed number of samples.
    pub orphans: Vec<Value>,
    /// Exact number of orphans, including the ones not sampled.
    pub orphan_count: u64,
    pub within_tolerance: bool,
    pub observed_at: DateTime<Utc>,
}

impl ReconciliationResult {
    pub fn has_orphans(&self) -> bool {
        self.orphan_count > 0
    }
}
