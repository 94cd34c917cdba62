use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::SyncResult;
use crate::types::Row;

/// Headers attached to a published event.
pub type EventHeaders = BTreeMap<String, String>;

/// A store answering native queries.
///
/// The query text is forwarded untouched; its dialect is the store's own.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn query(&self, text: &str, params: &[Value]) -> SyncResult<Vec<Row>>;
}

/// A store accepting bulk inserts into a named target.
///
/// Writes may be repeated after a failure, so implementations must tolerate rows they
/// already hold.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    async fn insert_batch(&self, target: &str, rows: Vec<Row>) -> SyncResult<()>;
}

/// A key/value cache.
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn get(&self, key: &str) -> SyncResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> SyncResult<()>;

    async fn delete(&self, key: &str) -> SyncResult<()>;
}

/// An event bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `payload` on `topic`, partitioned by `key`.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: &EventHeaders,
    ) -> SyncResult<()>;
}

/// A similarity-search store.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Returns at most `limit` entries of `collection`, most similar first.
    async fn search(&self, collection: &str, vector: &[f32], limit: usize) -> SyncResult<Vec<Row>>;
}

/// Row counts and key sets of a table, used to compare a store with another.
#[async_trait]
pub trait TableStats: Send + Sync {
    async fn count_rows(&self, table: &str) -> SyncResult<u64>;

    /// Returns the distinct non-null values of `column`.
    async fn identity_values(&self, table: &str, column: &str) -> SyncResult<Vec<Value>>;
}

/// The system of record, read by batch sync and reconciliation.
#[async_trait]
pub trait SourceStore: TableStats {
    /// Returns rows whose `timestamp_column` is strictly newer than `since`, oldest first.
    ///
    /// Without `since` every row is returned.
    async fn fetch_changed_since(
        &self,
        table: &str,
        timestamp_column: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<Row>>;
}

/// A derived store written by batch sync and compared by reconciliation.
pub trait DestinationStore: BatchWriter + TableStats {}

impl<T> DestinationStore for T where T: BatchWriter + TableStats {}
