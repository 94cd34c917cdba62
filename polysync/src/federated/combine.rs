use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::conversions::identity::row_identity;
use crate::conversions::timestamp::parse_timestamp;
use crate::types::{CombineMode, Row};

/// Combines the rows answered by each store, given in target order.
///
/// Rows without a usable identity key cannot be matched with other rows and are kept as they
/// are, in the order they were answered.
pub fn combine_rows(
    mode: CombineMode,
    answers: Vec<Vec<Row>>,
    identity_key: &str,
    timestamp_key: &str,
) -> Vec<Row> {
    let mut combined = Combined::default();

    for row in answers.into_iter().flatten() {
        match mode {
            CombineMode::Union => combined.keep_first(row, identity_key),
            CombineMode::Join => combined.compose(row, identity_key),
            CombineMode::Merge => combined.keep_latest(row, identity_key, timestamp_key),
        }
    }

    combined.rows
}

/// Rows in first-seen order with an index by identity key.
#[derive(Default)]
struct Combined {
    rows: Vec<Row>,
    positions: HashMap<String, usize>,
}

impl Combined {
    /// Returns the position of the row sharing the identity of `row`, or stores `row`.
    fn slot(&mut self, row: Row, identity_key: &str) -> Option<(usize, Row)> {
        let Some(key) = row_identity(&row, identity_key) else {
            self.rows.push(row);
            return None;
        };

        match self.positions.entry(key) {
            Entry::Occupied(entry) => Some((*entry.get(), row)),
            Entry::Vacant(entry) => {
                entry.insert(self.rows.len());
                self.rows.push(row);
                None
            }
        }
    }

    fn keep_first(&mut self, row: Row, identity_key: &str) {
        self.slot(row, identity_key);
    }

    /// Adds the columns of `row` missing from the stored row; stored values win conflicts.
    fn compose(&mut self, row: Row, identity_key: &str) {
        if let Some((position, row)) = self.slot(row, identity_key) {
            let target = &mut self.rows[position];
            for (column, value) in row {
                target.entry(column).or_insert(value);
            }
        }
    }

    /// Replaces the stored row if `row` is strictly newer. A row without a timestamp is older
    /// than any row with one.
    fn keep_latest(&mut self, row: Row, identity_key: &str, timestamp_key: &str) {
        if let Some((position, row)) = self.slot(row, identity_key) {
            let stored = self.rows[position].get(timestamp_key).and_then(parse_timestamp);
            let candidate = row.get(timestamp_key).and_then(parse_timestamp);
            if candidate > stored {
                self.rows[position] = row;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn rows(values: Value) -> Vec<Row> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|value| value.as_object().cloned().unwrap())
            .collect()
    }

    fn values(rows: Vec<Row>) -> Value {
        Value::Array(rows.into_iter().map(Value::Object).collect())
    }

    #[test]
    fn union_keeps_first_seen_per_identity() {
        let combined = combine_rows(
            CombineMode::Union,
            vec![
                rows(json!([{"id": 1, "from": "a"}, {"id": 2, "from": "a"}])),
                rows(json!([{"id": "2", "from": "b"}, {"id": 3, "from": "b"}])),
            ],
            "id",
            "updated_at",
        );

        assert_eq!(
            values(combined),
            json!([
                {"id": 1, "from": "a"},
                {"id": 2, "from": "a"},
                {"id": 3, "from": "b"}
            ])
        );
    }

    #[test]
    fn join_composes_wider_rows() {
        let combined = combine_rows(
            CombineMode::Join,
            vec![
                rows(json!([{"id": 1, "name": "ada"}])),
                rows(json!([{"id": 1, "name": "stale", "orders": 4}, {"id": 2, "orders": 1}])),
            ],
            "id",
            "updated_at",
        );

        assert_eq!(
            values(combined),
            json!([
                {"id": 1, "name": "ada", "orders": 4},
                {"id": 2, "orders": 1}
            ])
        );
    }

    #[test]
    fn merge_keeps_latest_and_prefers_earlier_on_ties() {
        let combined = combine_rows(
            CombineMode::Merge,
            vec![
                rows(json!([
                    {"id": 1, "v": "a", "updated_at": "2024-01-01T00:00:00Z"},
                    {"id": 2, "v": "a", "updated_at": "2024-01-02T00:00:00Z"},
                    {"id": 3, "v": "a"}
                ])),
                rows(json!([
                    {"id": 1, "v": "b", "updated_at": "2024-01-03T00:00:00Z"},
                    {"id": 2, "v": "b", "updated_at": "2024-01-02T00:00:00Z"},
                    {"id": 3, "v": "b", "updated_at": "2024-01-01T00:00:00Z"}
                ])),
            ],
            "id",
            "updated_at",
        );

        let versions: Vec<_> = combined.iter().map(|row| row["v"].clone()).collect();
        assert_eq!(versions, vec![json!("b"), json!("a"), json!("b")]);
    }

    #[test]
    fn rows_without_identity_pass_through() {
        let combined = combine_rows(
            CombineMode::Union,
            vec![rows(json!([{"total": 3}])), rows(json!([{"total": 3}]))],
            "id",
            "updated_at",
        );

        assert_eq!(combined.len(), 2);
    }
}
