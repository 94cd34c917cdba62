use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings of the reconciliation worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Largest accepted count drift, in percent of the source count.
    #[serde(default = "default_tolerance_percent")]
    pub tolerance_percent: f64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: u8,
    #[serde(default)]
    pub pairs: Vec<ReconciliationPairConfig>,
}

impl ReconciliationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=100.0).contains(&self.tolerance_percent) {
            return Err(ValidationError::invalid(
                "reconciliation.tolerance_percent",
                "must be between 0 and 100",
            ));
        }

        if self.interval_ms == 0 {
            return Err(ValidationError::invalid(
                "reconciliation.interval_ms",
                "must be greater than 0",
            ));
        }

        if self.jitter_percent > 100 {
            return Err(ValidationError::invalid(
                "reconciliation.jitter_percent",
                "must be between 0 and 100",
            ));
        }

        for pair in &self.pairs {
            if pair.source_table.trim().is_empty() || pair.destination_table.trim().is_empty() {
                return Err(ValidationError::invalid(
                    "reconciliation.pairs",
                    "source and destination tables must not be empty",
                ));
            }
        }

        Ok(())
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            tolerance_percent: default_tolerance_percent(),
            interval_ms: default_interval_ms(),
            jitter_percent: default_jitter_percent(),
            pairs: Vec::new(),
        }
    }
}

/// A source table compared against its projection in a derived store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconciliationPairConfig {
    pub source_table: String,
    pub destination_table: String,
    pub destination: String,
    /// Column of the source table referenced by destination rows.
    #[serde(default = "default_key_column")]
    pub source_key: String,
    /// Column of the destination table that must resolve to a source row.
    #[serde(default = "default_key_column")]
    pub foreign_key: String,
    /// Skips the orphan scan for very large tables where only counts are affordable.
    #[serde(default = "default_scan_orphans")]
    pub scan_orphans: bool,
}

impl ReconciliationPairConfig {
    pub fn new(
        source_table: impl Into<String>,
        destination_table: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            source_table: source_table.into(),
            destination_table: destination_table.into(),
            destination: destination.into(),
            source_key: default_key_column(),
            foreign_key: default_key_column(),
            scan_orphans: default_scan_orphans(),
        }
    }
}

fn default_tolerance_percent() -> f64 {
    1.0
}

fn default_interval_ms() -> u64 {
    300_000
}

fn default_jitter_percent() -> u8 {
    10
}

fn default_key_column() -> String {
    "id".to_string()
}

fn default_scan_orphans() -> bool {
    true
}
