use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polysync_config::shared::{
    IntoConnectOptions, PgConnectionConfig, RECONCILIATION_CONNECTION_OPTIONS,
    SYNC_CONNECTION_OPTIONS, TableCaptureConfig,
};
use polysync_postgres::{capture, source};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::capture::CaptureInstaller;
use crate::clients::base::{QueryClient, SourceStore, TableStats};
use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::transform::value_to_row;
use crate::types::Row;

fn rows_from_values(values: Vec<Value>) -> SyncResult<Vec<Row>> {
    values.into_iter().map(value_to_row).collect()
}

/// The primary store, read through `to_jsonb` so every table maps to [`Row`]s.
///
/// Bulk reads use a pool with a long statement timeout; counts and key scans use a separate
/// pool so a slow reconciliation never starves batch sync.
#[derive(Debug, Clone)]
pub struct PostgresPrimaryStore {
    sync_pool: PgPool,
    reconciliation_pool: PgPool,
}

impl PostgresPrimaryStore {
    pub fn new(config: &PgConnectionConfig) -> Self {
        let sync_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(config.max_connections)
            .connect_lazy_with(config.with_db(Some(&*SYNC_CONNECTION_OPTIONS)));
        let reconciliation_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(config.max_connections)
            .connect_lazy_with(config.with_db(Some(&*RECONCILIATION_CONNECTION_OPTIONS)));

        Self {
            sync_pool,
            reconciliation_pool,
        }
    }
}

impl CaptureInstaller for PostgresPrimaryStore {
    async fn install(&self, config: &TableCaptureConfig) -> SyncResult<()> {
        capture::install_capture(&self.sync_pool, config).await?;

        Ok(())
    }

    async fn remove(&self, config: &TableCaptureConfig) -> SyncResult<()> {
        capture::drop_capture(&self.sync_pool, config).await?;

        Ok(())
    }

    async fn is_installed(&self, config: &TableCaptureConfig) -> SyncResult<bool> {
        Ok(capture::capture_installed(&self.sync_pool, config).await?)
    }
}

#[async_trait]
impl TableStats for PostgresPrimaryStore {
    async fn count_rows(&self, table: &str) -> SyncResult<u64> {
        let count = source::count_rows(&self.reconciliation_pool, table).await?;

        u64::try_from(count).map_err(|_| {
            sync_error!(
                ErrorKind::ConversionError,
                "Negative row count",
                format!("table `{table}` reported {count} rows")
            )
        })
    }

    async fn identity_values(&self, table: &str, column: &str) -> SyncResult<Vec<Value>> {
        Ok(source::fetch_column_values(&self.reconciliation_pool, table, column).await?)
    }
}

#[async_trait]
impl SourceStore for PostgresPrimaryStore {
    async fn fetch_changed_since(
        &self,
        table: &str,
        timestamp_column: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<Row>> {
        let values =
            source::fetch_rows_changed_since(&self.sync_pool, table, timestamp_column, since)
                .await?;

        rows_from_values(values)
    }
}

#[async_trait]
impl QueryClient for PostgresPrimaryStore {
    async fn query(&self, text: &str, params: &[Value]) -> SyncResult<Vec<Row>> {
        let values = source::run_query(&self.reconciliation_pool, text, params).await?;

        rows_from_values(values)
    }
}
