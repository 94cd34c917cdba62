use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::shared::ValidationError;

/// Settings of the batch sync worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSyncConfig {
    /// Rows written per destination chunk.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Milliseconds between two sync passes.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Random spread added to the interval, as a percentage of it.
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: u8,
    #[serde(default)]
    pub pairs: Vec<TablePairConfig>,
}

impl BatchSyncConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::invalid(
                "sync.batch_size",
                "must be greater than 0",
            ));
        }

        if self.interval_ms == 0 {
            return Err(ValidationError::invalid(
                "sync.interval_ms",
                "must be greater than 0",
            ));
        }

        if self.jitter_percent > 100 {
            return Err(ValidationError::invalid(
                "sync.jitter_percent",
                "must be between 0 and 100",
            ));
        }

        let mut seen = HashSet::new();
        for pair in &self.pairs {
            pair.validate()?;
            if !seen.insert(pair.pair_name()) {
                return Err(ValidationError::DuplicateTable(pair.pair_name(), "sync.pairs"));
            }
        }

        Ok(())
    }
}

impl Default for BatchSyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            interval_ms: default_interval_ms(),
            jitter_percent: default_jitter_percent(),
            pairs: Vec::new(),
        }
    }
}

/// A source table synchronized into a destination table of a derived store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TablePairConfig {
    pub source_table: String,
    pub destination_table: String,
    /// Name of the destination store the rows are written to.
    pub destination: String,
    /// Monotonic change timestamp column used as the watermark cursor.
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    #[serde(default = "default_identity_column")]
    pub identity_column: String,
}

impl TablePairConfig {
    pub fn new(
        source_table: impl Into<String>,
        destination_table: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            source_table: source_table.into(),
            destination_table: destination_table.into(),
            destination: destination.into(),
            timestamp_column: default_timestamp_column(),
            identity_column: default_identity_column(),
        }
    }

    /// Stable key of the pair, used to persist its watermark.
    pub fn pair_name(&self) -> String {
        format!(
            "{}->{}.{}",
            self.source_table, self.destination, self.destination_table
        )
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("source_table", &self.source_table),
            ("destination_table", &self.destination_table),
            ("destination", &self.destination),
            ("timestamp_column", &self.timestamp_column),
            ("identity_column", &self.identity_column),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::invalid(
                    format!("sync.pairs.{field}"),
                    "must not be empty",
                ));
            }
        }

        Ok(())
    }
}

fn default_batch_size() -> usize {
    500
}

fn default_interval_ms() -> u64 {
    30_000
}

fn default_jitter_percent() -> u8 {
    10
}

fn default_timestamp_column() -> String {
    "updated_at".to_string()
}

fn default_identity_column() -> String {
    "id".to_string()
}
