//! Polysync service binary.
//!
//! Loads the service configuration, initializes telemetry and runs the sync context against
//! the configured primary and derived stores until it receives SIGINT or SIGTERM.

use polysync_config::shared::ServiceConfig;
use polysync_telemetry::metrics::{DEFAULT_METRICS_PORT, init_metrics};
use polysync_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_service_config;
use crate::core::start_replicator_with_config;
use crate::error::{ReplicatorError, ReplicatorResult};

mod config;
mod core;
mod error;

fn main() -> ReplicatorResult<()> {
    let config = load_service_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(ReplicatorError::config)?;

    init_metrics(DEFAULT_METRICS_PORT, Some(env!("CARGO_BIN_NAME")))
        .map_err(ReplicatorError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))?;

    Ok(())
}

async fn async_main(config: ServiceConfig) -> ReplicatorResult<()> {
    if let Err(err) = start_replicator_with_config(config).await {
        error!("{}", err.render_report());
        return Err(err);
    }

    Ok(())
}
