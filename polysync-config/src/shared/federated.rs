use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Defaults of the federated query layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedConfig {
    /// Time each target store gets to answer before it is reported as a warning.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Field identifying the same logical row across stores.
    #[serde(default = "default_identity_key")]
    pub identity_key: String,
    /// Field compared by the `merge` mode.
    #[serde(default = "default_timestamp_key")]
    pub timestamp_key: String,
}

impl FederatedConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.store_timeout_ms == 0 {
            return Err(ValidationError::invalid(
                "federated.store_timeout_ms",
                "must be greater than 0",
            ));
        }

        if self.identity_key.trim().is_empty() {
            return Err(ValidationError::invalid(
                "federated.identity_key",
                "must not be empty",
            ));
        }

        Ok(())
    }
}

impl Default for FederatedConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
            identity_key: default_identity_key(),
            timestamp_key: default_timestamp_key(),
        }
    }
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_identity_key() -> String {
    "id".to_string()
}

fn default_timestamp_key() -> String {
    "updated_at".to_string()
}
