use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::clients::EventHeaders;
use crate::conversions::identity::composite_identity;
use crate::error::SyncResult;
use crate::types::{ChangeRecord, Operation};

/// Header carrying the payload checksum.
pub const CHECKSUM_HEADER: &str = "checksum";

pub const TABLE_HEADER: &str = "table";

pub const OPERATION_HEADER: &str = "operation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub source: String,
    pub schema_version: u32,
    /// Hex encoded SHA-256 of the envelope body.
    pub checksum: String,
}

/// The fields of an envelope covered by its checksum.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeBody<'a> {
    id: &'a Uuid,
    table: &'a str,
    operation: Operation,
    old_record: &'a Option<Value>,
    new_record: &'a Option<Value>,
    timestamp: &'a DateTime<Utc>,
    transaction_id: &'a str,
}

/// A change as published on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEnvelope {
    pub id: Uuid,
    pub table: String,
    pub operation: Operation,
    pub old_record: Option<Value>,
    pub new_record: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub transaction_id: String,
    pub metadata: EnvelopeMetadata,
}

impl ChangeEnvelope {
    pub fn from_change(
        change: &ChangeRecord,
        source: impl Into<String>,
        schema_version: u32,
    ) -> SyncResult<Self> {
        let checksum = compute_checksum(&EnvelopeBody {
            id: &change.id,
            table: &change.table,
            operation: change.operation,
            old_record: &change.old_value,
            new_record: &change.new_value,
            timestamp: &change.captured_at,
            transaction_id: &change.source_transaction_id,
        })?;

        Ok(Self {
            id: change.id,
            table: change.table.clone(),
            operation: change.operation,
            old_record: change.old_value.clone(),
            new_record: change.new_value.clone(),
            timestamp: change.captured_at,
            transaction_id: change.source_transaction_id.clone(),
            metadata: EnvelopeMetadata {
                source: source.into(),
                schema_version,
                checksum,
            },
        })
    }

    /// Recomputes the checksum of the body and compares it with the one in the metadata.
    pub fn verify_checksum(&self) -> SyncResult<bool> {
        let checksum = compute_checksum(&EnvelopeBody {
            id: &self.id,
            table: &self.table,
            operation: self.operation,
            old_record: &self.old_record,
            new_record: &self.new_record,
            timestamp: &self.timestamp,
            transaction_id: &self.transaction_id,
        })?;

        Ok(checksum == self.metadata.checksum)
    }

    pub fn headers(&self) -> EventHeaders {
        EventHeaders::from([
            (CHECKSUM_HEADER.to_string(), self.metadata.checksum.clone()),
            (TABLE_HEADER.to_string(), self.table.clone()),
            (OPERATION_HEADER.to_string(), self.operation.to_string()),
        ])
    }

    pub fn to_payload(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn compute_checksum(body: &EnvelopeBody<'_>) -> SyncResult<String> {
    let bytes = serde_json::to_vec(body)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);

    Ok(format!("{:x}", hasher.finalize()))
}

/// Returns the event key of a change: its identity columns joined with `:`, or the change id
/// when the row lacks one of them.
pub fn envelope_key(change: &ChangeRecord, identity_columns: &[String]) -> String {
    change
        .affected_row()
        .and_then(Value::as_object)
        .and_then(|row| composite_identity(row, identity_columns))
        .unwrap_or_else(|| change.id.to_string())
}
