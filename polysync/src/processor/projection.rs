use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::clients::{BatchWriter, CacheClient, EventPublisher};
use crate::error::{ErrorKind, SyncResult};
use crate::processor::envelope::{ChangeEnvelope, envelope_key};
use crate::processor::handler::ChangeHandler;
use crate::sync_error;
use crate::transform::{RowTransform, value_to_row};
use crate::types::{ChangeRecord, Operation};

/// Column added to columnar projections holding the change operation.
pub const OPERATION_COLUMN: &str = "_operation";

/// Column added to columnar projections holding the capture time.
pub const CAPTURED_AT_COLUMN: &str = "_captured_at";

struct CacheTarget {
    client: Arc<dyn CacheClient>,
    key_prefix: String,
}

struct ColumnarTarget {
    writer: Arc<dyn BatchWriter>,
    table: String,
    transform: Arc<dyn RowTransform>,
}

struct EventTarget {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    source: String,
    schema_version: u32,
}

/// Standard handler projecting a table's changes into the derived stores.
///
/// Each configured step runs in order:
/// - cache: inserts and updates store the new row under `{prefix}:{identity}`, deletes
///   invalidate the key;
/// - columnar: the transformed row is inserted with its operation and capture time, so
///   deletes are recorded as tombstones;
/// - events: the change envelope is published with its checksum header.
///
/// Every step is idempotent, so replaying a change converges on the same state.
pub struct ProjectionHandler {
    identity_columns: Vec<String>,
    cache: Option<CacheTarget>,
    columnar: Option<ColumnarTarget>,
    events: Option<EventTarget>,
}

impl ProjectionHandler {
    pub fn new<I, S>(identity_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identity_columns: identity_columns.into_iter().map(Into::into).collect(),
            cache: None,
            columnar: None,
            events: None,
        }
    }

    pub fn with_cache(mut self, client: Arc<dyn CacheClient>, key_prefix: impl Into<String>) -> Self {
        self.cache = Some(CacheTarget {
            client,
            key_prefix: key_prefix.into(),
        });
        self
    }

    pub fn with_columnar(
        mut self,
        writer: Arc<dyn BatchWriter>,
        table: impl Into<String>,
        transform: Arc<dyn RowTransform>,
    ) -> Self {
        self.columnar = Some(ColumnarTarget {
            writer,
            table: table.into(),
            transform,
        });
        self
    }

    pub fn with_events(
        mut self,
        publisher: Arc<dyn EventPublisher>,
        topic: impl Into<String>,
        source: impl Into<String>,
        schema_version: u32,
    ) -> Self {
        self.events = Some(EventTarget {
            publisher,
            topic: topic.into(),
            source: source.into(),
            schema_version,
        });
        self
    }

    fn affected_row(change: &ChangeRecord) -> SyncResult<&Value> {
        change.affected_row().ok_or_else(|| {
            sync_error!(
                ErrorKind::InvalidData,
                "Change carries no row image",
                format!("change {} on `{}`", change.id, change.table)
            )
        })
    }

    async fn project_to_cache(&self, target: &CacheTarget, change: &ChangeRecord) -> SyncResult<()> {
        let key = format!(
            "{}:{}",
            target.key_prefix,
            envelope_key(change, &self.identity_columns)
        );

        match (change.operation, &change.new_value) {
            (Operation::Delete, _) | (_, None) => target.client.delete(&key).await,
            (_, Some(row)) => target.client.set(&key, row.clone()).await,
        }
    }

    async fn project_to_columnar(
        &self,
        target: &ColumnarTarget,
        change: &ChangeRecord,
    ) -> SyncResult<()> {
        let row = value_to_row(Self::affected_row(change)?.clone())?;
        let mut projected = target.transform.transform(&row)?;
        projected.insert(
            OPERATION_COLUMN.to_string(),
            Value::from(change.operation.as_str()),
        );
        projected.insert(
            CAPTURED_AT_COLUMN.to_string(),
            Value::from(change.captured_at.to_rfc3339()),
        );

        target.writer.insert_batch(&target.table, vec![projected]).await
    }

    async fn publish(&self, target: &EventTarget, change: &ChangeRecord) -> SyncResult<()> {
        let envelope = ChangeEnvelope::from_change(change, &target.source, target.schema_version)?;
        let key = envelope_key(change, &self.identity_columns);

        target
            .publisher
            .publish(&target.topic, &key, envelope.to_payload()?, &envelope.headers())
            .await
    }
}

#[async_trait]
impl ChangeHandler for ProjectionHandler {
    async fn handle(&self, change: &ChangeRecord) -> SyncResult<()> {
        if let Some(target) = &self.cache {
            self.project_to_cache(target, change).await?;
        }

        if let Some(target) = &self.columnar {
            self.project_to_columnar(target, change).await?;
        }

        if let Some(target) = &self.events {
            self.publish(target, change).await?;
        }

        debug!(change_id = %change.id, table = %change.table, "change projected");

        Ok(())
    }
}

impl fmt::Debug for ProjectionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionHandler")
            .field("identity_columns", &self.identity_columns)
            .field("cache", &self.cache.as_ref().map(|t| &t.key_prefix))
            .field("columnar", &self.columnar.as_ref().map(|t| &t.table))
            .field("events", &self.events.as_ref().map(|t| &t.topic))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::memory::{MemoryCache, MemoryEventBus, MemoryTableStore};
    use crate::processor::envelope::CHECKSUM_HEADER;
    use crate::transform::TableMapping;
    use serde_json::json;

    struct Fixture {
        cache: MemoryCache,
        columnar: MemoryTableStore,
        bus: MemoryEventBus,
        handler: ProjectionHandler,
    }

    fn fixture() -> Fixture {
        let cache = MemoryCache::new();
        let columnar = MemoryTableStore::new();
        let bus = MemoryEventBus::new();
        let handler = ProjectionHandler::new(["id"])
            .with_cache(Arc::new(cache.clone()), "users")
            .with_columnar(
                Arc::new(columnar.clone()),
                "users_history",
                Arc::new(TableMapping::identity().exclude(["password"])),
            )
            .with_events(Arc::new(bus.clone()), "users.changes", "primary", 1);

        Fixture {
            cache,
            columnar,
            bus,
            handler,
        }
    }

    #[tokio::test]
    async fn insert_fills_every_store() {
        let fixture = fixture();
        let change = ChangeRecord::new(
            "users",
            Operation::Insert,
            None,
            Some(json!({"id": 5, "name": "ann", "password": "x"})),
            "3",
        )
        .unwrap();

        fixture.handler.handle(&change).await.unwrap();

        let cached = fixture.cache.get("users:5").await.unwrap();
        assert_eq!(cached, change.new_value);

        let history = fixture.columnar.rows("users_history").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0][OPERATION_COLUMN], json!("INSERT"));
        assert!(!history[0].contains_key("password"));

        let events = fixture.bus.events_for("users.changes").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "5");
        assert!(events[0].headers.contains_key(CHECKSUM_HEADER));
        let envelope: ChangeEnvelope = serde_json::from_slice(&events[0].payload).unwrap();
        assert!(envelope.verify_checksum().unwrap());
    }

    #[tokio::test]
    async fn delete_invalidates_the_cache() {
        let fixture = fixture();
        fixture
            .cache
            .set("users:5", json!({"id": 5}))
            .await
            .unwrap();

        let change =
            ChangeRecord::new("users", Operation::Delete, Some(json!({"id": 5})), None, "4")
                .unwrap();
        fixture.handler.handle(&change).await.unwrap();

        assert_eq!(fixture.cache.get("users:5").await.unwrap(), None);
        let history = fixture.columnar.rows("users_history").await;
        assert_eq!(history[0][OPERATION_COLUMN], json!("DELETE"));
    }

    #[tokio::test]
    async fn replaying_a_change_converges() {
        let fixture = fixture();
        let change = ChangeRecord::new(
            "users",
            Operation::Update,
            Some(json!({"id": 5, "name": "ann"})),
            Some(json!({"id": 5, "name": "bea"})),
            "8",
        )
        .unwrap();

        fixture.handler.handle(&change).await.unwrap();
        fixture.handler.handle(&change).await.unwrap();

        assert_eq!(fixture.cache.entries().await.len(), 1);
        assert_eq!(
            fixture.cache.get("users:5").await.unwrap(),
            Some(json!({"id": 5, "name": "bea"}))
        );
    }
}
