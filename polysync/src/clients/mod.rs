//! Capability contracts of the stores kept in sync, with in-memory and Postgres
//! implementations.

pub mod base;
pub mod memory;
pub mod postgres;

pub use base::*;
