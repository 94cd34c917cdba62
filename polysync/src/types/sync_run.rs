use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use crate::error::{ErrorKind, SyncError};
use crate::sync_error;

/// Lifecycle state of a batch sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunState {
    Idle,
    Running,
    Completed,
    Error,
}

impl SyncRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunState::Idle => "idle",
            SyncRunState::Running => "running",
            SyncRunState::Completed => "completed",
            SyncRunState::Error => "error",
        }
    }

    /// Returns `true` once the run can no longer change.
    pub fn is_final(&self) -> bool {
        matches!(self, SyncRunState::Completed | SyncRunState::Error)
    }
}

impl fmt::Display for SyncRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncRunState {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "idle" => Ok(SyncRunState::Idle),
            "running" => Ok(SyncRunState::Running),
            "completed" => Ok(SyncRunState::Completed),
            "error" => Ok(SyncRunState::Error),
            other => Err(sync_error!(
                ErrorKind::InvalidData,
                "Unknown sync run state",
                other
            )),
        }
    }
}

/// Status of one batch sync run of a table pair.
///
/// Built with [`SyncRunStatus::start`] and finalized once with [`SyncRunStatus::complete`] or
/// [`SyncRunStatus::fail`], which consume the running status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunStatus {
    pub table: String,
    pub started_at: DateTime<Utc>,
    pub records_processed: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub state: SyncRunState,
    #[serde(skip)]
    started: Option<Instant>,
}

impl SyncRunStatus {
    pub fn start(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            started_at: Utc::now(),
            records_processed: 0,
            errors: Vec::new(),
            duration_ms: 0,
            state: SyncRunState::Running,
            started: Some(Instant::now()),
        }
    }

    /// Rebuilds a finished run from persisted fields.
    pub fn restore(
        table: String,
        started_at: DateTime<Utc>,
        records_processed: u64,
        errors: Vec<String>,
        duration_ms: u64,
        state: SyncRunState,
    ) -> Self {
        Self {
            table,
            started_at,
            records_processed,
            errors,
            duration_ms,
            state,
            started: None,
        }
    }

    pub fn complete(self, records_processed: u64) -> Self {
        self.finish(SyncRunState::Completed, records_processed, Vec::new())
    }

    pub fn fail(self, records_processed: u64, errors: Vec<String>) -> Self {
        self.finish(SyncRunState::Error, records_processed, errors)
    }

    fn finish(mut self, state: SyncRunState, records_processed: u64, errors: Vec<String>) -> Self {
        if self.state.is_final() {
            return self;
        }

        self.duration_ms = self
            .started
            .take()
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or_default();
        self.records_processed = records_processed;
        self.errors = errors;
        self.state = state;
        self
    }
}
