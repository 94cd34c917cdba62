use polysync::error::SyncError;
use sqlx::migrate::MigrateError;
use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

pub type ReplicatorResult<T> = Result<T, ReplicatorError>;

/// Backtrace captured when an infrastructure error is raised.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error of the service binary.
///
/// Sync failures keep their [`SyncError`]; startup failures outside the sync core carry
/// their source and a backtrace.
#[derive(Debug)]
pub enum ReplicatorError {
    Sync(SyncError),
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    Migration(MigrateError, CapturedBacktrace),
    Io(std::io::Error, CapturedBacktrace),
}

impl ReplicatorError {
    pub fn category(&self) -> &'static str {
        match self {
            ReplicatorError::Sync(_) => "sync error",
            ReplicatorError::Config(_, _) => "configuration error",
            ReplicatorError::Migration(_, _) => "migration error",
            ReplicatorError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            ReplicatorError::Sync(err) => err.backtrace(),
            ReplicatorError::Config(_, captured) => Some(&captured.0),
            ReplicatorError::Migration(_, captured) => Some(&captured.0),
            ReplicatorError::Io(_, captured) => Some(&captured.0),
        }
    }

    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ReplicatorError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Renders the error with its causes, and its backtrace when `RUST_BACKTRACE` asks for it.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("polysync replicator failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        // Aggregated sync errors already list every member in their display.
        if !matches!(self, ReplicatorError::Sync(err) if err.errors().is_some()) {
            let mut source = Error::source(self);
            let mut index = 1usize;
            while let Some(err) = source {
                out.push_str(&format!("cause {index}: {err}\n"));
                source = err.source();
                index += 1;
            }
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for ReplicatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicatorError::Sync(err) => write!(f, "{err}"),
            ReplicatorError::Config(source, _) => write!(f, "configuration error: {source}"),
            ReplicatorError::Migration(source, _) => write!(f, "migration error: {source}"),
            ReplicatorError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for ReplicatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReplicatorError::Sync(err) => err.source(),
            ReplicatorError::Config(source, _) => Some(source.as_ref()),
            ReplicatorError::Migration(source, _) => Some(source),
            ReplicatorError::Io(source, _) => Some(source),
        }
    }
}

impl From<MigrateError> for ReplicatorError {
    fn from(err: MigrateError) -> Self {
        ReplicatorError::Migration(err, CapturedBacktrace::capture())
    }
}

impl From<std::io::Error> for ReplicatorError {
    fn from(err: std::io::Error) -> Self {
        ReplicatorError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<SyncError> for ReplicatorError {
    fn from(err: SyncError) -> Self {
        ReplicatorError::Sync(err)
    }
}
