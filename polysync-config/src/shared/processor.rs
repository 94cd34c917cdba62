use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings of the change processor worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeProcessorConfig {
    /// Maximum number of change records claimed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Milliseconds between polls of the change log.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Failures after which a record is left for manual inspection.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay of the exponential retry backoff, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// How long a claimed batch stays invisible to other processor instances.
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    /// Whether processed changes are republished onto the event bus.
    #[serde(default = "default_publish_events")]
    pub publish_events: bool,
    /// Value of `metadata.source` in published envelopes.
    #[serde(default = "default_source_name")]
    pub source_name: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

impl ChangeProcessorConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 100;
    pub const DEFAULT_MAX_RETRIES: u32 = 5;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::invalid(
                "processor.batch_size",
                "must be greater than 0",
            ));
        }

        if self.max_retries == 0 {
            return Err(ValidationError::invalid(
                "processor.max_retries",
                "must be greater than 0",
            ));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ValidationError::invalid(
                "processor.retry_base_delay_ms",
                "must not exceed `retry_max_delay_ms`",
            ));
        }

        if self.lease_ms == 0 {
            return Err(ValidationError::invalid(
                "processor.lease_ms",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for ChangeProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            lease_ms: default_lease_ms(),
            publish_events: default_publish_events(),
            source_name: default_source_name(),
            schema_version: default_schema_version(),
        }
    }
}

fn default_batch_size() -> usize {
    ChangeProcessorConfig::DEFAULT_BATCH_SIZE
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    ChangeProcessorConfig::DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    300_000
}

fn default_lease_ms() -> u64 {
    60_000
}

fn default_publish_events() -> bool {
    true
}

fn default_source_name() -> String {
    "primary".to_string()
}

fn default_schema_version() -> u32 {
    1
}
