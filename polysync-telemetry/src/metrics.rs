use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;
use tracing::trace;

/// Port of the metrics listener started by [`init_metrics`].
pub const DEFAULT_METRICS_PORT: u16 = 9000;

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// The recorder is global and installing it twice fails, while tests ask for a handle many
// times. A mutex is used since the initialization is fallible.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the recorder once and returns a handle rendering the current metrics.
///
/// Must be called within a tokio runtime, which runs the recorder upkeep.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut prometheus_handle = PROMETHEUS_HANDLE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(handle) = &*prometheus_handle {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *prometheus_handle = Some(handle.clone());

    let upkeep_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            upkeep_handle.run_upkeep();
        }
    });

    Ok(handle)
}

/// Installs the recorder with an HTTP listener serving `/metrics` on `port`.
///
/// `service` is attached to every metric as a global label.
pub fn init_metrics(port: u16, service: Option<&str>) -> Result<(), BuildError> {
    let mut builder = PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port));

    if let Some(service) = service {
        builder = builder.add_global_label("service", service);
    }

    builder.install()?;

    Ok(())
}
