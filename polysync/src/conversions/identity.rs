use serde_json::Value;

use crate::types::Row;

/// Renders an identity value as a comparable key.
///
/// Numbers and strings render to the same text, so an id read as a number from one store
/// matches the same id read as text from another. Null has no key.
pub fn identity_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        other => Some(other.to_string()),
    }
}

/// Returns the identity key of a row, or `None` if the row has no usable value for `column`.
pub fn row_identity(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(identity_key)
}

/// Joins the values of several identity columns with `:`.
///
/// Returns `None` if any column is missing or null.
pub fn composite_identity(row: &Row, columns: &[String]) -> Option<String> {
    let parts = columns
        .iter()
        .map(|column| row_identity(row, column))
        .collect::<Option<Vec<_>>>()?;

    if parts.is_empty() {
        return None;
    }

    Some(parts.join(":"))
}
