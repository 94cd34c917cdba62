use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Capture policy of one primary-store table.
///
/// `captured_columns` is an allow-list where empty means every column. `excluded_columns`
/// is applied after it, so a column named in both lists is never captured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableCaptureConfig {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub captured_columns: Vec<String>,
    #[serde(default)]
    pub excluded_columns: Vec<String>,
    /// Logical event-bus topic the table's changes are routed to.
    pub destination_topic: String,
    /// Columns forming the row identity used for cache keys and partition affinity.
    #[serde(default = "default_identity_columns")]
    pub identity_columns: Vec<String>,
}

impl TableCaptureConfig {
    pub fn new(table: impl Into<String>, destination_topic: impl Into<String>) -> Self {
        Self {
            schema: default_schema(),
            table: table.into(),
            enabled: default_enabled(),
            captured_columns: Vec::new(),
            excluded_columns: Vec::new(),
            destination_topic: destination_topic.into(),
            identity_columns: default_identity_columns(),
        }
    }

    pub fn with_captured_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.captured_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_excluded_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_identity_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.table.trim().is_empty() {
            return Err(ValidationError::invalid("capture.table", "must not be empty"));
        }

        if self.destination_topic.trim().is_empty() {
            return Err(ValidationError::invalid(
                format!("capture[{}].destination_topic", self.table),
                "must not be empty",
            ));
        }

        if self.identity_columns.is_empty() {
            return Err(ValidationError::invalid(
                format!("capture[{}].identity_columns", self.table),
                "must name at least one column",
            ));
        }

        Ok(())
    }
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_identity_columns() -> Vec<String> {
    vec!["id".to_string()]
}
