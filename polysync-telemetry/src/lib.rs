//! Logging and metrics initialization shared by polysync binaries and tests.

pub mod metrics;
pub mod tracing;
