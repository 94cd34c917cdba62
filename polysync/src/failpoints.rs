use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// Raised before a batch sync chunk is written.
pub const SYNC_TABLE_BEFORE_CHUNK_WRITE: &str = "sync_table.before_chunk_write";

/// Raised before a change record is dispatched to its handler.
pub const PROCESS_CHANGE_BEFORE_HANDLER: &str = "process_change.before_handler";

/// Raised before a capture routine is installed.
pub const PROVISION_BEFORE_INSTALL: &str = "provision.before_install";

pub fn sync_fail_point(name: &str) -> SyncResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("timed_retry") => ErrorKind::WithTimedRetry,
            _ => ErrorKind::WithNoRetry,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
