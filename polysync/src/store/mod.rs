//! Persistence of the change log, watermarks and run history.

pub mod both;
pub mod change_log;
pub mod state;
