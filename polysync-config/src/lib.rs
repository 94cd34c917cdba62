//! Configuration for polysync services.
//!
//! Holds the typed configuration sections consumed by the sync core and the layered loader
//! that reads them from files and `APP_` environment variables at startup.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
