//! Change capture and synchronization from a primary relational store into derived stores.
//!
//! Row changes of captured tables are appended to a change log in the same transaction as
//! the write ([`capture`]). The [`processor`] drains that log into per-table handlers that
//! project changes into caches, columnar stores and event buses. Independently, the
//! [`sync`] engine copies rows newer than a persisted watermark in bulk and [`reconcile`]
//! compares row counts and keys of both sides. [`federated`] queries fan out to several
//! stores at once, and [`saga`] runs writes across stores with compensating rollback.
//!
//! A [`context::SyncContext`] owns the stores and configuration and runs the periodic
//! [`workers`].

pub mod capture;
pub mod clients;
pub mod concurrency;
pub mod context;
pub mod conversions;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod federated;
mod macros;
pub mod metrics;
pub mod processor;
pub mod reconcile;
pub mod saga;
pub mod store;
pub mod sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transform;
pub mod types;
pub mod workers;
