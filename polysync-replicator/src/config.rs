use polysync_config::load_config;
use polysync_config::shared::ServiceConfig;

use crate::error::{ReplicatorError, ReplicatorResult};

/// Loads and validates the service configuration.
pub fn load_service_config() -> ReplicatorResult<ServiceConfig> {
    let config = load_config::<ServiceConfig>().map_err(ReplicatorError::config)?;
    config.validate().map_err(ReplicatorError::config)?;

    Ok(config)
}
