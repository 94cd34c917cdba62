use chrono::{DateTime, TimeZone, Utc};
use polysync_config::shared::{ServiceConfig, TableCaptureConfig};
use serde_json::{Value, json};

use crate::types::Row;

/// Converts a json object into a row.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(row) => row,
        other => panic!("expected a json object, got {other}"),
    }
}

/// Returns `2024-01-01T00:00:00Z` shifted by `seconds`.
pub fn timestamp(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
}

/// A `users` row updated at [`timestamp`]`(updated_at)`.
pub fn user_row(id: i64, name: &str, updated_at: i64) -> Row {
    row(json!({
        "id": id,
        "name": name,
        "updated_at": timestamp(updated_at).to_rfc3339(),
    }))
}

pub fn capture_config(table: &str) -> TableCaptureConfig {
    TableCaptureConfig::new(table, format!("{table}.changes"))
}

/// A valid service configuration capturing `tables`, with short intervals for tests.
pub fn service_config(tables: &[&str]) -> ServiceConfig {
    let capture: Vec<Value> = tables
        .iter()
        .map(|table| json!({"table": table, "destination_topic": format!("{table}.changes")}))
        .collect();

    serde_json::from_value(json!({
        "primary": {"host": "localhost", "port": 5432, "name": "app", "username": "postgres"},
        "capture": capture,
        "processor": {
            "poll_interval_ms": 10,
            "retry_base_delay_ms": 1,
            "retry_max_delay_ms": 10
        },
        "sync": {"interval_ms": 10, "jitter_percent": 0},
        "reconciliation": {"interval_ms": 10, "jitter_percent": 0},
        "retention": {"interval_ms": 10}
    }))
    .unwrap()
}
