//! Configuration sections shared by the sync core and the replicator.

mod base;
mod capture;
mod connection;
mod federated;
mod processor;
mod reconciliation;
mod retention;
mod service;
mod stores;
mod sync;

pub use base::ValidationError;
pub use capture::TableCaptureConfig;
pub use connection::{
    IntoConnectOptions, PROCESSOR_CONNECTION_OPTIONS, PgConnectionConfig, PgConnectionOptions,
    RECONCILIATION_CONNECTION_OPTIONS, SYNC_CONNECTION_OPTIONS, TlsConfig,
};
pub use federated::FederatedConfig;
pub use processor::ChangeProcessorConfig;
pub use reconciliation::{ReconciliationConfig, ReconciliationPairConfig};
pub use retention::RetentionConfig;
pub use service::ServiceConfig;
pub use stores::{ClickHouseConfig, KafkaConfig, RedisConfig, StoresConfig};
pub use sync::{BatchSyncConfig, TablePairConfig};
