use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::SyncResult;
use crate::types::ChangeRecord;

/// Reacts to the changes of one table.
///
/// Delivery is at least once: a handler may see the same change again after a failure or an
/// expired lease, so handling must be idempotent.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, change: &ChangeRecord) -> SyncResult<()>;
}

/// Handlers keyed by table name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ChangeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler of a table, replacing any previous one.
    pub fn register(&mut self, table: impl Into<String>, handler: Arc<dyn ChangeHandler>) {
        self.handlers.insert(table.into(), handler);
    }

    pub fn with(mut self, table: impl Into<String>, handler: Arc<dyn ChangeHandler>) -> Self {
        self.register(table, handler);
        self
    }

    pub fn get(&self, table: &str) -> Option<&Arc<dyn ChangeHandler>> {
        self.handlers.get(table)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tables: Vec<_> = self.handlers.keys().collect();
        tables.sort();
        f.debug_struct("HandlerRegistry")
            .field("tables", &tables)
            .finish()
    }
}
