//! Watermark-based bulk synchronization of table pairs.

mod engine;

pub use engine::{BatchSyncEngine, SyncPair};
