//! Utilities for testing the sync core.
//!
//! Most helpers run against the in-memory stores of [`crate::clients::memory`] and
//! [`crate::store::both::memory`]:
//!
//! - [`fixtures`] builds rows, timestamps and configuration.
//! - [`wrappers`] wraps stores and handlers to delay, fail or observe calls.
//! - [`notify`] waits on notifications with a timeout so hanging tests fail instead.
//! - `database` spawns a throwaway Postgres database when `TESTS_DATABASE_HOST` is set.
//! - `failpoints` scopes fault injection to a test, with the `failpoints` feature.

#[cfg(feature = "test-utils")]
pub mod database;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod fixtures;
pub mod notify;
pub mod wrappers;
