//! Queries fanned out to several stores and combined into one result.

mod combine;
mod executor;

pub use combine::combine_rows;
pub use executor::{FederatedExecutor, FederatedStore};
