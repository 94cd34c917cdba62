//! Count and orphan comparison between the primary store and derived stores.

mod engine;

pub use engine::{ConsistencyReport, MAX_ORPHAN_SAMPLES, ReconciliationEngine, percent_diff};
