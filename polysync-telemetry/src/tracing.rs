use polysync_config::Environment;
use std::io;
use std::sync::Once;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to read the environment: {0}")]
    Environment(#[from] io::Error),

    #[error("failed to forward log records to tracing: {0}")]
    LogTracer(#[from] tracing_log::log::SetLoggerError),

    #[error("failed to install the tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Flushes buffered log lines when dropped. Keep it alive for the whole process.
#[must_use = "dropping the flusher stops log output"]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

fn env_filter(app_name: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{app_name}=info,polysync=info")))
}

/// Installs the global subscriber of a service.
///
/// Logs go to stdout through a non-blocking writer, as JSON in deployed environments and in
/// a human readable format in development. `log` records are forwarded to tracing.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load()?;
    LogTracer::init()?;

    let (writer, guard) = tracing_appender::non_blocking(io::stdout());
    let layer = if environment.is_deployed() {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer().with_writer(writer).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter(app_name))
        .with(layer)
        .try_init()?;

    Ok(LogFlusher { _guard: guard })
}

static INIT_TEST_TRACING: Once = Once::new();

/// Installs a test writer subscriber once per process.
///
/// Output is only shown when `ENABLE_TRACING` is set, so test runs stay quiet by default.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_err() {
            return;
        }

        let _ = tracing_subscriber::registry()
            .with(env_filter("polysync"))
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
