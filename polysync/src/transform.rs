//! Row transformation into a target schema.
//!
//! The same [`RowTransform`] is used by the change processor when it projects a captured row
//! and by the batch sync engine when it copies rows in bulk, so both paths write identical
//! shapes.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::types::Row;

/// Maps a source row into the shape of a destination table.
pub trait RowTransform: Send + Sync + fmt::Debug {
    fn transform(&self, row: &Row) -> SyncResult<Row>;
}

/// Declarative column mapping of one table.
///
/// Columns are first selected (an empty selection keeps every column), then excluded, then
/// renamed. Constant columns are added last and overwrite mapped ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableMapping {
    selected: Vec<String>,
    excluded: Vec<String>,
    renamed: BTreeMap<String, String>,
    constants: BTreeMap<String, Value>,
    required: Vec<String>,
}

impl TableMapping {
    /// A mapping copying rows unchanged.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renamed.insert(from.into(), to.into());
        self
    }

    pub fn constant(mut self, column: impl Into<String>, value: Value) -> Self {
        self.constants.insert(column.into(), value);
        self
    }

    /// Source columns that must be present; rows missing one fail to transform.
    pub fn require<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = columns.into_iter().map(Into::into).collect();
        self
    }

    fn keeps(&self, column: &str) -> bool {
        (self.selected.is_empty() || self.selected.iter().any(|c| c == column))
            && !self.excluded.iter().any(|c| c == column)
    }
}

impl RowTransform for TableMapping {
    fn transform(&self, row: &Row) -> SyncResult<Row> {
        if let Some(missing) = self.required.iter().find(|column| !row.contains_key(*column)) {
            return Err(sync_error!(
                ErrorKind::TransformFailed,
                "Row is missing a required column",
                format!("column `{missing}` is missing")
            ));
        }

        let mut mapped = Row::new();
        for (column, value) in row {
            if !self.keeps(column) {
                continue;
            }

            let target = self.renamed.get(column).unwrap_or(column);
            mapped.insert(target.clone(), value.clone());
        }

        for (column, value) in &self.constants {
            mapped.insert(column.clone(), value.clone());
        }

        Ok(mapped)
    }
}

/// Converts a json value holding an object into a [`Row`].
pub fn value_to_row(value: Value) -> SyncResult<Row> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(sync_error!(
            ErrorKind::InvalidData,
            "Row is not a json object",
            format!("received {other}")
        )),
    }
}
