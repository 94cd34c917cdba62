use polysync::clients::postgres::PostgresPrimaryStore;
use polysync::clients::{BatchWriter, CacheClient, EventPublisher, SourceStore};
use polysync::context::SyncContext;
use polysync::processor::ProjectionHandler;
use polysync::store::both::postgres::PostgresStore;
use polysync::transform::TableMapping;
use polysync_config::shared::{ChangeProcessorConfig, ServiceConfig, StoresConfig, TableCaptureConfig};
use polysync_destinations::clickhouse::ClickHouseStore;
use polysync_destinations::kafka::KafkaPublisher;
use polysync_destinations::redis::RedisCache;
use polysync_postgres::migrate::apply_polysync_migrations;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

use crate::error::ReplicatorResult;

/// Name under which the primary store is exposed to federated queries.
const PRIMARY_STORE_NAME: &str = "primary";

/// Name under which the ClickHouse store is registered as destination and query store.
const CLICKHOUSE_STORE_NAME: &str = "clickhouse";

/// Suffix of the columnar table receiving a captured table's change history.
const CHANGES_TABLE_SUFFIX: &str = "_changes";

/// Clients of the derived stores present in the configuration.
#[derive(Default)]
struct ConnectedStores {
    cache: Option<Arc<RedisCache>>,
    columnar: Option<Arc<ClickHouseStore>>,
    events: Option<Arc<KafkaPublisher>>,
}

async fn connect_stores(config: &StoresConfig) -> ReplicatorResult<ConnectedStores> {
    let mut stores = ConnectedStores::default();

    if let Some(redis) = &config.redis {
        stores.cache = Some(Arc::new(RedisCache::connect(redis).await?));
        info!(host = %redis.host, "redis cache connected");
    }

    if let Some(clickhouse) = &config.clickhouse {
        let store = ClickHouseStore::new(clickhouse);
        store.ping().await?;
        stores.columnar = Some(Arc::new(store));
        info!(url = %clickhouse.url, "clickhouse store connected");
    }

    if let Some(kafka) = &config.kafka {
        stores.events = Some(Arc::new(KafkaPublisher::new(kafka)?));
        info!(brokers = %kafka.brokers, "kafka producer created");
    }

    Ok(stores)
}

/// Builds the projection handler of a captured table from the stores that are configured.
fn projection_handler(
    capture: &TableCaptureConfig,
    processor: &ChangeProcessorConfig,
    stores: &ConnectedStores,
) -> ProjectionHandler {
    let mut handler = ProjectionHandler::new(capture.identity_columns.iter().cloned());

    if let Some(cache) = &stores.cache {
        let client: Arc<dyn CacheClient> = cache.clone();
        handler = handler.with_cache(client, capture.table.clone());
    }

    if let Some(columnar) = &stores.columnar {
        let writer: Arc<dyn BatchWriter> = columnar.clone();
        handler = handler.with_columnar(
            writer,
            format!("{}{CHANGES_TABLE_SUFFIX}", capture.table),
            Arc::new(TableMapping::identity()),
        );
    }

    if processor.publish_events
        && let Some(events) = &stores.events
    {
        let publisher: Arc<dyn EventPublisher> = events.clone();
        handler = handler.with_events(
            publisher,
            capture.destination_topic.clone(),
            processor.source_name.clone(),
            processor.schema_version,
        );
    }

    handler
}

/// Runs the service with the given configuration until it is asked to stop.
pub async fn start_replicator_with_config(config: ServiceConfig) -> ReplicatorResult<()> {
    apply_polysync_migrations(&config.primary).await?;

    let store = PostgresStore::new(&config.primary);
    let primary = PostgresPrimaryStore::new(&config.primary);
    let stores = connect_stores(&config.stores).await?;

    let source: Arc<dyn SourceStore> = Arc::new(primary.clone());
    let mut context = SyncContext::new(config.clone(), store, primary.clone(), source)
        .with_query_store(PRIMARY_STORE_NAME, Arc::new(primary));

    for capture in config.capture.iter().filter(|capture| capture.enabled) {
        let handler = projection_handler(capture, &config.processor, &stores);
        context = context.with_handler(capture.table.clone(), Arc::new(handler));
    }

    if let Some(columnar) = &stores.columnar {
        context = context
            .with_destination(CLICKHOUSE_STORE_NAME, columnar.clone())
            .with_query_store(CLICKHOUSE_STORE_NAME, columnar.clone());
    }

    start_context(context).await
}

/// Starts the context and stops it on SIGINT or SIGTERM.
///
/// Workers finish their current batch before exiting, so a change being handled when the
/// signal arrives is either completed or left claimable for the next start.
async fn start_context(
    mut context: SyncContext<PostgresStore, PostgresPrimaryStore>,
) -> ReplicatorResult<()> {
    context.start().await?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown_tx = context.shutdown_tx();
    let shutdown_handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, shutting down");
            }
            _ = sigterm.recv() => {
                info!("sigterm received, shutting down");
            }
        }

        shutdown_tx.shutdown();
    });

    let result = context.wait().await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    result?;
    info!("polysync replicator stopped");

    Ok(())
}
