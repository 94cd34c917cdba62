//! Dispatch of captured changes to per-table handlers.

mod engine;
mod envelope;
mod handler;
mod projection;

pub use engine::{ChangeProcessor, ProcessOutcome, retry_delay};
pub use envelope::{
    CHECKSUM_HEADER, ChangeEnvelope, EnvelopeMetadata, OPERATION_HEADER, TABLE_HEADER,
    envelope_key,
};
pub use handler::{ChangeHandler, HandlerRegistry};
pub use projection::{CAPTURED_AT_COLUMN, OPERATION_COLUMN, ProjectionHandler};
