//! Coordination primitives for the background workers.

pub mod jitter;
pub mod shutdown;
