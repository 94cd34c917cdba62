use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::{bail, sync_error};

/// Row-level operation recorded by a capture trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(sync_error!(
                ErrorKind::InvalidData,
                "Unknown change operation",
                format!("operation `{other}` is not one of INSERT, UPDATE, DELETE")
            )),
        }
    }
}

/// A captured row change, as stored in the change log.
///
/// An insert carries only `new_value`, a delete only `old_value` and an update both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    pub table: String,
    pub operation: Operation,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub captured_at: DateTime<Utc>,
    pub source_transaction_id: String,
    pub processed: bool,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl ChangeRecord {
    /// Builds a fresh, unprocessed record and checks that the row images match the operation.
    pub fn new(
        table: impl Into<String>,
        operation: Operation,
        old_value: Option<Value>,
        new_value: Option<Value>,
        source_transaction_id: impl Into<String>,
    ) -> SyncResult<Self> {
        let table = table.into();
        let valid = match operation {
            Operation::Insert => old_value.is_none() && new_value.is_some(),
            Operation::Update => old_value.is_some() && new_value.is_some(),
            Operation::Delete => old_value.is_some() && new_value.is_none(),
        };
        if !valid {
            bail!(
                ErrorKind::InvalidData,
                "Row images do not match the change operation",
                format!("{operation} on `{table}`")
            );
        }

        Ok(Self {
            id: Uuid::new_v4(),
            table,
            operation,
            old_value,
            new_value,
            captured_at: Utc::now(),
            source_transaction_id: source_transaction_id.into(),
            processed: false,
            error_message: None,
            retry_count: 0,
        })
    }

    /// Returns the row image identifying the affected row: the new image, or the old one for
    /// deletes.
    pub fn affected_row(&self) -> Option<&Value> {
        self.new_value.as_ref().or(self.old_value.as_ref())
    }
}
