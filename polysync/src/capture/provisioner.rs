use polysync_config::shared::TableCaptureConfig;
use polysync_postgres::capture::CaptureColumns;
use std::future::Future;
use tracing::{error, info};

use crate::error::{ErrorKind, SyncError, SyncResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{PROVISION_BEFORE_INSTALL, sync_fail_point};
use crate::sync_error;

/// A store able to install a capture routine on one of its tables.
///
/// Installing must be idempotent: installing twice leaves a single, up to date routine.
pub trait CaptureInstaller {
    fn install(&self, config: &TableCaptureConfig) -> impl Future<Output = SyncResult<()>> + Send;

    fn remove(&self, config: &TableCaptureConfig) -> impl Future<Output = SyncResult<()>> + Send;

    fn is_installed(
        &self,
        config: &TableCaptureConfig,
    ) -> impl Future<Output = SyncResult<bool>> + Send;
}

/// Every failure while provisioning is a fatal configuration error: capture is never skipped.
fn capture_configuration_error(config: &TableCaptureConfig, err: SyncError) -> SyncError {
    if err.kind() == ErrorKind::CaptureConfigurationFailed {
        return err;
    }

    sync_error!(
        ErrorKind::CaptureConfigurationFailed,
        "Change capture could not be provisioned",
        format!("table {}.{}: {}", config.schema, config.table, err.summary()),
        source: err
    )
}

/// Installs and removes capture routines according to [`TableCaptureConfig`]s.
#[derive(Debug, Clone)]
pub struct CaptureProvisioner<I> {
    installer: I,
}

impl<I> CaptureProvisioner<I>
where
    I: CaptureInstaller + Sync,
{
    pub fn new(installer: I) -> Self {
        Self { installer }
    }

    /// Installs the capture routine of one table.
    pub async fn provision(&self, config: &TableCaptureConfig) -> SyncResult<()> {
        let install = async {
            config.validate()?;
            // Resolving first reports an empty column set before touching the store.
            CaptureColumns::resolve(config)?;

            #[cfg(feature = "failpoints")]
            sync_fail_point(PROVISION_BEFORE_INSTALL)?;

            self.installer.install(config).await
        };

        if let Err(err) = install.await {
            error!(table = %config.table, error = %err.summary(), "failed to provision capture");
            return Err(capture_configuration_error(config, err));
        }

        info!(table = %config.table, topic = %config.destination_topic, "capture provisioned");

        Ok(())
    }

    /// Removes the capture routine of one table. Removing an absent routine succeeds.
    pub async fn deprovision(&self, config: &TableCaptureConfig) -> SyncResult<()> {
        self.installer
            .remove(config)
            .await
            .map_err(|err| capture_configuration_error(config, err))?;

        info!(table = %config.table, "capture deprovisioned");

        Ok(())
    }

    /// Provisions enabled tables and deprovisions disabled ones, stopping at the first error.
    ///
    /// Returns the number of tables with capture installed.
    pub async fn provision_all(&self, configs: &[TableCaptureConfig]) -> SyncResult<usize> {
        let mut provisioned = 0;
        for config in configs {
            if config.enabled {
                self.provision(config).await?;
                provisioned += 1;
            } else {
                self.deprovision(config).await?;
            }
        }

        Ok(provisioned)
    }

    pub async fn is_provisioned(&self, config: &TableCaptureConfig) -> SyncResult<bool> {
        self.installer.is_installed(config).await
    }
}
