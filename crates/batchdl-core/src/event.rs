//! Events delivered to subscribers.

use crate::model::{BatchId, BatchStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// New batch snapshot (throttled progress, or a state change).
    Batch(BatchStatus),
    /// A durable write failed. In-memory state is unaffected and the write is
    /// retried at the next persistence point.
    PersistenceFailed { batch_id: BatchId, message: String },
}

impl DownloadEvent {
    pub fn batch_id(&self) -> &BatchId {
        match self {
            DownloadEvent::Batch(status) => &status.id,
            DownloadEvent::PersistenceFailed { batch_id, .. } => batch_id,
        }
    }
}
