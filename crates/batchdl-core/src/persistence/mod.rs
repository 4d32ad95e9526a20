//! Persistence gateway: durable batch and file records.
//!
//! A submission is written as one transaction (batch row plus every file row)
//! before it is acknowledged. Progress writes during a transfer go through
//! `update_file`/`update_batch`. Deletion is two-phase: the caller first
//! records DELETING together with whether the data goes too, then removes each
//! file record, then the batch record.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::model::{BatchId, BatchState, BatchStatus, FileId, FileRecord};

/// A batch as read back from storage, files in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBatch {
    pub status: BatchStatus,
    pub files: Vec<FileRecord>,
    /// Set by an unfinished delete that also removes the downloaded data.
    pub remove_files: bool,
}

#[async_trait]
pub trait DownloadsPersistence: Send + Sync {
    /// Insert or replace a batch and all of its files in one transaction.
    async fn persist_batch(
        &self,
        batch: &BatchStatus,
        files: &[FileRecord],
    ) -> Result<(), PersistenceError>;

    /// Write the DELETING mark: like `persist_batch`, and in the same
    /// transaction record whether the delete also removes the data.
    async fn mark_deleting(
        &self,
        batch: &BatchStatus,
        files: &[FileRecord],
        remove_files: bool,
    ) -> Result<(), PersistenceError>;

    /// Update the derived fields of an existing batch row.
    async fn update_batch(&self, batch: &BatchStatus) -> Result<(), PersistenceError>;

    /// Update status and progress of an existing file row. Unknown files are ignored.
    async fn update_file(&self, file: &FileRecord) -> Result<(), PersistenceError>;

    /// Every stored batch, oldest first.
    async fn load_batches(&self) -> Result<Vec<StoredBatch>, PersistenceError>;

    async fn load_batch(&self, id: &BatchId) -> Result<Option<StoredBatch>, PersistenceError>;

    async fn query_by_status(&self, state: BatchState) -> Result<Vec<BatchStatus>, PersistenceError>;

    async fn delete_file(&self, batch_id: &BatchId, file_id: &FileId)
        -> Result<(), PersistenceError>;

    /// Remove the batch row and any file rows left.
    async fn delete_batch(&self, id: &BatchId) -> Result<(), PersistenceError>;

    async fn set_notification_seen(&self, id: &BatchId, seen: bool) -> Result<(), PersistenceError>;
}
