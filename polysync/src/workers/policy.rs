use crate::error::{ErrorKind, SyncError};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The next scheduled run is expected to succeed without intervention.
    Timed,
    /// Runs keep failing until an operator acts.
    Manual,
    /// The worker must stop.
    NoRetry,
}

/// How a worker reacts to a [`SyncError`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an operator-facing hint, if any.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

pub fn build_error_handling_policy(error: &SyncError) -> ErrorHandlingPolicy {
    match error.kind() {
        // Transient failures that the next run recovers from on its own.
        ErrorKind::PrimaryConnectionFailed
        | ErrorKind::DestinationConnectionFailed
        | ErrorKind::DestinationWriteFailed
        | ErrorKind::SyncBatchFailed
        | ErrorKind::HandlerFailed
        | ErrorKind::Timeout => ErrorHandlingPolicy::new(RetryDirective::Timed, None),

        ErrorKind::CaptureConfigurationFailed => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Check that the captured table exists and the service role may create triggers on it."),
        ),
        ErrorKind::MissingTableMapping => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Add the table pair to the sync configuration."),
        ),
        ErrorKind::StoreNotFound => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Configure the destination store referenced by the table pair."),
        ),
        ErrorKind::ConversionError | ErrorKind::TransformFailed | ErrorKind::InvalidData => {
            ErrorHandlingPolicy::new(
                RetryDirective::Manual,
                Some("Fix the offending rows or adjust the table mapping."),
            )
        }
        ErrorKind::ConfigError | ErrorKind::ValidationError => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Fix the configuration and restart the service."),
        ),

        // Kinds raised by fault injection tests.
        #[cfg(feature = "failpoints")]
        ErrorKind::WithNoRetry => {
            ErrorHandlingPolicy::new(RetryDirective::NoRetry, Some("Cannot retry this error."))
        }
        #[cfg(feature = "failpoints")]
        ErrorKind::WithTimedRetry => ErrorHandlingPolicy::new(
            RetryDirective::Timed,
            Some("Will automatically retry on the next run."),
        ),

        _ => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("There is no single prescribed solution for this error. Inspect the logs of the failing worker."),
        ),
    }
}
