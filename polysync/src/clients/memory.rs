use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polysync_config::shared::TableCaptureConfig;
use polysync_postgres::capture::CaptureColumns;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bail;
use crate::capture::CaptureInstaller;
use crate::clients::base::{
    BatchWriter, CacheClient, EventHeaders, EventPublisher, QueryClient, SourceStore, TableStats,
    VectorSearch,
};
use crate::conversions::identity::{identity_key, row_identity};
use crate::conversions::timestamp::parse_timestamp;
use crate::error::{ErrorKind, SyncResult};
use crate::store::both::memory::MemoryStore;
use crate::types::{ChangeRecord, Operation, Row};

const DEFAULT_IDENTITY_COLUMN: &str = "id";

fn distinct_values<'a>(rows: impl Iterator<Item = &'a Row>, column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    rows.filter_map(|row| row.get(column))
        .filter(|value| !value.is_null())
        .filter(|value| identity_key(value).is_some_and(|key| seen.insert(key)))
        .cloned()
        .collect()
}

/// Inserts `row` or replaces the row with the same identity.
fn upsert_row(rows: &mut Vec<Row>, row: Row, identity_column: &str) {
    let key = row_identity(&row, identity_column);
    let existing = key.as_ref().and_then(|key| {
        rows.iter()
            .position(|current| row_identity(current, identity_column).as_ref() == Some(key))
    });

    match existing {
        Some(index) => rows[index] = row,
        None => rows.push(row),
    }
}

/// In-memory tables standing in for a columnar or document store.
///
/// Batches are upserted by identity column, so replayed batches leave the table unchanged.
/// Queries take a table name as text and return every row of that table.
#[derive(Debug, Clone)]
pub struct MemoryTableStore {
    tables: Arc<Mutex<HashMap<String, Vec<Row>>>>,
    identity_column: String,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::with_identity_column(DEFAULT_IDENTITY_COLUMN)
    }

    pub fn with_identity_column(identity_column: impl Into<String>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            identity_column: identity_column.into(),
        }
    }

    /// Replaces the content of a table.
    pub async fn seed(&self, table: &str, rows: Vec<Row>) {
        let mut tables = self.tables.lock().await;
        tables.insert(table.to_string(), rows);
    }

    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.lock().await;
        tables.get(table).cloned().unwrap_or_default()
    }
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchWriter for MemoryTableStore {
    async fn insert_batch(&self, target: &str, rows: Vec<Row>) -> SyncResult<()> {
        let mut tables = self.tables.lock().await;
        let table = tables.entry(target.to_string()).or_default();
        for row in rows {
            upsert_row(table, row, &self.identity_column);
        }

        Ok(())
    }
}

#[async_trait]
impl TableStats for MemoryTableStore {
    async fn count_rows(&self, table: &str) -> SyncResult<u64> {
        let tables = self.tables.lock().await;
        Ok(tables.get(table).map_or(0, Vec::len) as u64)
    }

    async fn identity_values(&self, table: &str, column: &str) -> SyncResult<Vec<Value>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .get(table)
            .map(|rows| distinct_values(rows.iter(), column))
            .unwrap_or_default())
    }
}

#[async_trait]
impl QueryClient for MemoryTableStore {
    async fn query(&self, text: &str, _params: &[Value]) -> SyncResult<Vec<Row>> {
        Ok(self.rows(text.trim()).await)
    }
}

/// In-memory key/value cache.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> HashMap<String, Value> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> SyncResult<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// An event captured by [`MemoryEventBus`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: EventHeaders,
}

impl PublishedEvent {
    pub fn payload_json(&self) -> SyncResult<Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// In-memory event bus keeping every published event in order.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventBus {
    events: Arc<Mutex<Vec<PublishedEvent>>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().await.clone()
    }

    pub async fn events_for(&self, topic: &str) -> Vec<PublishedEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| event.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: &EventHeaders,
    ) -> SyncResult<()> {
        self.events.lock().await.push(PublishedEvent {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
            headers: headers.clone(),
        });

        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    Some(dot / (norm_a * norm_b))
}

/// In-memory similarity search over embeddings, ranked by cosine similarity.
///
/// Returned rows carry their similarity under `score`.
#[derive(Debug, Clone, Default)]
pub struct MemoryVectorStore {
    collections: Arc<Mutex<HashMap<String, Vec<(Vec<f32>, Row)>>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, collection: &str, embedding: Vec<f32>, row: Row) {
        let mut collections = self.collections.lock().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .push((embedding, row));
    }
}

#[async_trait]
impl VectorSearch for MemoryVectorStore {
    async fn search(&self, collection: &str, vector: &[f32], limit: usize) -> SyncResult<Vec<Row>> {
        let collections = self.collections.lock().await;
        let Some(entries) = collections.get(collection) else {
            bail!(
                ErrorKind::StoreNotFound,
                "Unknown vector collection",
                format!("collection `{collection}` does not exist")
            );
        };

        let mut scored: Vec<(f32, &Row)> = entries
            .iter()
            .filter_map(|(embedding, row)| {
                cosine_similarity(embedding, vector).map(|score| (score, row))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, row)| {
                let mut row = row.clone();
                row.insert("score".to_string(), Value::from(score as f64));
                row
            })
            .collect())
    }
}

/// A row-level write against [`MemoryPrimaryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum RowWrite {
    Insert { table: String, row: Row },
    /// Replaces the row with the same identity.
    Update { table: String, row: Row },
    Delete { table: String, identity: Value },
}

#[derive(Debug, Default)]
struct PrimaryInner {
    tables: BTreeMap<String, Vec<Row>>,
    captures: HashMap<String, CaptureColumns>,
    next_transaction_id: u64,
}

/// In-memory primary store with trigger-like change capture.
///
/// Every [`MemoryPrimaryStore::apply`] call is one transaction: either all of its writes and
/// the change records they produce become visible, or none do.
#[derive(Debug, Clone)]
pub struct MemoryPrimaryStore {
    inner: Arc<Mutex<PrimaryInner>>,
    change_log: MemoryStore,
    identity_column: String,
}

impl MemoryPrimaryStore {
    /// Creates a primary store appending captured changes to `change_log`.
    pub fn new(change_log: MemoryStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PrimaryInner::default())),
            change_log,
            identity_column: DEFAULT_IDENTITY_COLUMN.to_string(),
        }
    }

    pub fn change_log(&self) -> &MemoryStore {
        &self.change_log
    }

    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).cloned().unwrap_or_default()
    }

    pub async fn insert(&self, table: &str, row: Row) -> SyncResult<()> {
        self.apply(vec![RowWrite::Insert {
            table: table.to_string(),
            row,
        }])
        .await
    }

    pub async fn update(&self, table: &str, row: Row) -> SyncResult<()> {
        self.apply(vec![RowWrite::Update {
            table: table.to_string(),
            row,
        }])
        .await
    }

    pub async fn delete(&self, table: &str, identity: Value) -> SyncResult<()> {
        self.apply(vec![RowWrite::Delete {
            table: table.to_string(),
            identity,
        }])
        .await
    }

    /// Applies writes atomically together with the change records of captured tables.
    pub async fn apply(&self, writes: Vec<RowWrite>) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        let mut tables = inner.tables.clone();
        let transaction_id = inner.next_transaction_id.to_string();
        let mut changes = Vec::new();

        for write in writes {
            let (table, operation, old_row, new_row) = self.apply_write(&mut tables, write)?;

            if let Some(columns) = inner.captures.get(&table) {
                let project = |row: Row| -> Value {
                    Value::Object(
                        row.into_iter()
                            .filter(|(column, _)| columns.includes(column))
                            .collect(),
                    )
                };
                changes.push(ChangeRecord::new(
                    table,
                    operation,
                    old_row.map(project),
                    new_row.map(project),
                    transaction_id.clone(),
                )?);
            }
        }

        // The change log is appended while the table lock is held, so no reader of the
        // primary can observe the writes without their change records.
        self.change_log.append_changes(changes).await;
        inner.tables = tables;
        inner.next_transaction_id += 1;

        Ok(())
    }

    fn apply_write(
        &self,
        tables: &mut BTreeMap<String, Vec<Row>>,
        write: RowWrite,
    ) -> SyncResult<(String, Operation, Option<Row>, Option<Row>)> {
        match write {
            RowWrite::Insert { table, row } => {
                let Some(key) = row_identity(&row, &self.identity_column) else {
                    bail!(
                        ErrorKind::InvalidData,
                        "Inserted row has no identity",
                        format!("table `{table}` requires column `{}`", self.identity_column)
                    );
                };
                let rows = tables.entry(table.clone()).or_default();
                if rows
                    .iter()
                    .any(|current| row_identity(current, &self.identity_column) == Some(key.clone()))
                {
                    bail!(
                        ErrorKind::InvalidState,
                        "Duplicate identity",
                        format!("table `{table}` already holds identity {key}")
                    );
                }
                rows.push(row.clone());

                Ok((table, Operation::Insert, None, Some(row)))
            }
            RowWrite::Update { table, row } => {
                let key = row_identity(&row, &self.identity_column);
                let position = self.position(tables, &table, key.as_deref())?;
                let rows = tables.entry(table.clone()).or_default();
                let old = std::mem::replace(&mut rows[position], row.clone());

                Ok((table, Operation::Update, Some(old), Some(row)))
            }
            RowWrite::Delete { table, identity } => {
                let key = identity_key(&identity);
                let position = self.position(tables, &table, key.as_deref())?;
                let rows = tables.entry(table.clone()).or_default();
                let old = rows.remove(position);

                Ok((table, Operation::Delete, Some(old), None))
            }
        }
    }

    fn position(
        &self,
        tables: &BTreeMap<String, Vec<Row>>,
        table: &str,
        key: Option<&str>,
    ) -> SyncResult<usize> {
        let position = key.and_then(|key| {
            tables.get(table).and_then(|rows| {
                rows.iter().position(|row| {
                    row_identity(row, &self.identity_column).as_deref() == Some(key)
                })
            })
        });

        match position {
            Some(position) => Ok(position),
            None => bail!(
                ErrorKind::InvalidState,
                "Row not found",
                format!("table `{table}` has no row with identity {key:?}")
            ),
        }
    }
}

impl CaptureInstaller for MemoryPrimaryStore {
    async fn install(&self, config: &TableCaptureConfig) -> SyncResult<()> {
        let columns = CaptureColumns::resolve(config)?;
        let mut inner = self.inner.lock().await;
        inner.captures.insert(config.table.clone(), columns);

        Ok(())
    }

    async fn remove(&self, config: &TableCaptureConfig) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.captures.remove(&config.table);

        Ok(())
    }

    async fn is_installed(&self, config: &TableCaptureConfig) -> SyncResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.captures.contains_key(&config.table))
    }
}

#[async_trait]
impl TableStats for MemoryPrimaryStore {
    async fn count_rows(&self, table: &str) -> SyncResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.tables.get(table).map_or(0, Vec::len) as u64)
    }

    async fn identity_values(&self, table: &str, column: &str) -> SyncResult<Vec<Value>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .get(table)
            .map(|rows| distinct_values(rows.iter(), column))
            .unwrap_or_default())
    }
}

#[async_trait]
impl SourceStore for MemoryPrimaryStore {
    async fn fetch_changed_since(
        &self,
        table: &str,
        timestamp_column: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<Row>> {
        let inner = self.inner.lock().await;
        let Some(rows) = inner.tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut changed: Vec<(Option<DateTime<Utc>>, Row)> = rows
            .iter()
            .map(|row| {
                let timestamp = row.get(timestamp_column).and_then(parse_timestamp);
                (timestamp, row.clone())
            })
            .filter(|(timestamp, _)| match (since, timestamp) {
                (None, _) => true,
                (Some(since), Some(timestamp)) => *timestamp > since,
                (Some(_), None) => false,
            })
            .collect();
        // Rows without a timestamp sort last.
        changed.sort_by_key(|(timestamp, _)| (timestamp.is_none(), *timestamp));

        Ok(changed.into_iter().map(|(_, row)| row).collect())
    }
}

#[async_trait]
impl QueryClient for MemoryPrimaryStore {
    async fn query(&self, text: &str, _params: &[Value]) -> SyncResult<Vec<Row>> {
        Ok(self.rows(text.trim()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::change_log::ChangeLogStore;
    use crate::transform::value_to_row;
    use serde_json::json;
    use std::time::Duration;

    fn row(value: Value) -> Row {
        value_to_row(value).unwrap()
    }

    async fn captured_primary(config: TableCaptureConfig) -> MemoryPrimaryStore {
        let primary = MemoryPrimaryStore::new(MemoryStore::new());
        primary.install(&config).await.unwrap();
        primary
    }

    #[tokio::test]
    async fn writes_to_captured_tables_produce_changes() {
        let primary = captured_primary(TableCaptureConfig::new("users", "users.changes")).await;

        primary.insert("users", row(json!({"id": 1, "name": "a"}))).await.unwrap();
        primary.update("users", row(json!({"id": 1, "name": "b"}))).await.unwrap();
        primary.delete("users", json!(1)).await.unwrap();
        primary.insert("audit", row(json!({"id": 1}))).await.unwrap();

        let changes = primary.change_log().change_records().await;
        let operations: Vec<_> = changes.iter().map(|c| c.operation).collect();
        assert_eq!(
            operations,
            vec![Operation::Insert, Operation::Update, Operation::Delete]
        );
        assert_eq!(changes[1].old_value, Some(json!({"id": 1, "name": "a"})));
        assert_eq!(changes[1].new_value, Some(json!({"id": 1, "name": "b"})));
        assert_eq!(changes[2].new_value, None);
    }

    #[tokio::test]
    async fn excluded_columns_are_not_captured() {
        let config = TableCaptureConfig::new("users", "users.changes")
            .with_captured_columns(["id", "email", "password"])
            .with_excluded_columns(["password"]);
        let primary = captured_primary(config).await;

        primary
            .insert(
                "users",
                row(json!({"id": 1, "email": "a@b.c", "password": "x", "age": 3})),
            )
            .await
            .unwrap();

        let changes = primary.change_log().change_records().await;
        assert_eq!(changes[0].new_value, Some(json!({"id": 1, "email": "a@b.c"})));
    }

    #[tokio::test]
    async fn failed_transaction_leaves_no_trace() {
        let primary = captured_primary(TableCaptureConfig::new("users", "users.changes")).await;
        primary.insert("users", row(json!({"id": 1}))).await.unwrap();

        let result = primary
            .apply(vec![
                RowWrite::Insert {
                    table: "users".to_string(),
                    row: row(json!({"id": 2})),
                },
                RowWrite::Insert {
                    table: "users".to_string(),
                    row: row(json!({"id": 1})),
                },
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(primary.rows("users").await.len(), 1);
        assert_eq!(primary.change_log().change_records().await.len(), 1);
    }

    #[tokio::test]
    async fn changes_of_one_transaction_share_its_id() {
        let primary = captured_primary(TableCaptureConfig::new("users", "users.changes")).await;
        primary
            .apply(vec![
                RowWrite::Insert {
                    table: "users".to_string(),
                    row: row(json!({"id": 1})),
                },
                RowWrite::Insert {
                    table: "users".to_string(),
                    row: row(json!({"id": 2})),
                },
            ])
            .await
            .unwrap();
        primary.insert("users", row(json!({"id": 3}))).await.unwrap();

        let claimed = primary
            .change_log()
            .claim_pending(10, 5, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(claimed[0].source_transaction_id, claimed[1].source_transaction_id);
        assert_ne!(claimed[1].source_transaction_id, claimed[2].source_transaction_id);
    }

    #[tokio::test]
    async fn changed_rows_are_returned_oldest_first() {
        let primary = MemoryPrimaryStore::new(MemoryStore::new());
        primary
            .insert("orders", row(json!({"id": 1, "updated_at": "2024-01-03T00:00:00Z"})))
            .await
            .unwrap();
        primary
            .insert("orders", row(json!({"id": 2, "updated_at": "2024-01-01T00:00:00Z"})))
            .await
            .unwrap();
        primary
            .insert("orders", row(json!({"id": 3, "updated_at": "2024-01-02T00:00:00Z"})))
            .await
            .unwrap();

        let all = primary
            .fetch_changed_since("orders", "updated_at", None)
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|row| row["id"].clone()).collect();
        assert_eq!(ids, vec![json!(2), json!(3), json!(1)]);

        let since = parse_timestamp(&json!("2024-01-02T00:00:00Z"));
        let newer = primary
            .fetch_changed_since("orders", "updated_at", since)
            .await
            .unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0]["id"], json!(1));
    }

    #[tokio::test]
    async fn table_store_upserts_by_identity() {
        let store = MemoryTableStore::new();
        store
            .insert_batch("users", vec![row(json!({"id": 1, "v": 1})), row(json!({"id": 2}))])
            .await
            .unwrap();
        store
            .insert_batch("users", vec![row(json!({"id": 1, "v": 2}))])
            .await
            .unwrap();

        assert_eq!(store.count_rows("users").await.unwrap(), 2);
        assert_eq!(store.rows("users").await[0]["v"], json!(2));
    }

    #[tokio::test]
    async fn vector_search_ranks_by_similarity() {
        let store = MemoryVectorStore::new();
        store.insert("docs", vec![1.0, 0.0], row(json!({"id": "x"}))).await;
        store.insert("docs", vec![0.0, 1.0], row(json!({"id": "y"}))).await;

        let rows = store.search("docs", &[0.1, 0.9], 1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("y"));

        assert!(store.search("missing", &[1.0], 1).await.is_err());
    }
}
