//! Conversions of json row values used by sync, reconciliation and federation.

pub mod identity;
pub mod timestamp;
