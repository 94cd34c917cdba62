//! Postgres side of polysync.
//!
//! Owns the `polysync` schema (change log, watermarks, run history), generates the capture
//! functions and triggers installed on watched tables, and exposes the queries the sync core
//! runs against the primary store.

pub mod capture;
pub mod change_log;
pub mod history;
pub mod migrate;
pub mod source;
#[cfg(feature = "test-utils")]
pub mod test_utils;
pub mod watermark;

/// Schema holding every table owned by polysync.
pub const POLYSYNC_SCHEMA: &str = "polysync";
