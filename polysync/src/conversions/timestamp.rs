use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::types::Row;

/// Formats accepted for timestamps without an offset, which are read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses a json timestamp.
///
/// Accepts RFC 3339 strings, offset-less strings as produced by `to_jsonb` for `timestamp`
/// columns, and integers holding milliseconds since the Unix epoch.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }

            NAIVE_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(|naive| naive.and_utc())
        }
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

/// Reads the timestamp stored under `column`, failing if it is missing or malformed.
pub fn row_timestamp(row: &Row, column: &str) -> SyncResult<DateTime<Utc>> {
    let Some(value) = row.get(column) else {
        bail!(
            ErrorKind::InvalidData,
            "Row has no timestamp column",
            format!("column `{column}` is missing")
        );
    };

    match parse_timestamp(value) {
        Some(timestamp) => Ok(timestamp),
        None => bail!(
            ErrorKind::ConversionError,
            "Invalid timestamp value",
            format!("column `{column}` holds {value}")
        ),
    }
}
