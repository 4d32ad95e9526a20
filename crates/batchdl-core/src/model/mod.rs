//! Entity model: identifiers, file/batch statuses, submission requests.

mod ids;
mod request;
mod status;

pub use ids::{BatchId, FileId};
pub use request::{BatchRequest, FileRequest};
pub use status::{aggregate, aggregate_state, Aggregate, BatchState, BatchStatus, FileRecord, FileSize, FileStatus};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix milliseconds (batch `created_at`).
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
