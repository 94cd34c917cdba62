use serde::Deserialize;
use std::collections::HashSet;

use crate::Config;
use crate::shared::{
    BatchSyncConfig, ChangeProcessorConfig, FederatedConfig, PgConnectionConfig,
    ReconciliationConfig, RetentionConfig, StoresConfig, TableCaptureConfig, ValidationError,
};

/// Complete configuration of a polysync service.
///
/// Everything is read once at startup, there is no dynamic reconfiguration. This does not
/// implement `Serialize` since it carries secrets.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// The system of record whose tables are captured.
    pub primary: PgConnectionConfig,
    #[serde(default)]
    pub capture: Vec<TableCaptureConfig>,
    #[serde(default)]
    pub processor: ChangeProcessorConfig,
    #[serde(default)]
    pub sync: BatchSyncConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub federated: FederatedConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub stores: StoresConfig,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.primary.validate()?;

        // Change records and handlers are keyed by the bare table name, so two schemas
        // cannot capture tables of the same name.
        let mut seen = HashSet::new();
        for capture in &self.capture {
            capture.validate()?;
            if !seen.insert(capture.table.as_str()) {
                return Err(ValidationError::DuplicateTable(
                    capture.table.clone(),
                    "capture",
                ));
            }
        }

        self.processor.validate()?;
        self.sync.validate()?;
        self.reconciliation.validate()?;
        self.federated.validate()?;
        self.retention.validate()?;
        self.stores.validate()
    }
}

impl Config for ServiceConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
