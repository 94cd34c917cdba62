//! Network adapters for the stores kept in sync with the primary store.
//!
//! Each adapter implements the capability traits of [`polysync::clients`] and is gated behind
//! a feature of the same name, so a deployment only links the client libraries it uses.

#[cfg(feature = "clickhouse")]
pub mod clickhouse;
#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(feature = "redis")]
pub mod redis;
