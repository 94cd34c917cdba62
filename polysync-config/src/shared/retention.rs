use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Cleanup of processed change log rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Processed rows older than this many hours are deleted.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl RetentionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.max_age_hours == 0 {
            return Err(ValidationError::invalid(
                "retention.max_age_hours",
                "must be greater than 0 when retention is enabled",
            ));
        }

        if self.interval_ms == 0 {
            return Err(ValidationError::invalid(
                "retention.interval_ms",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_age_hours: default_max_age_hours(),
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_age_hours() -> u64 {
    24 * 7
}

fn default_interval_ms() -> u64 {
    3_600_000
}
