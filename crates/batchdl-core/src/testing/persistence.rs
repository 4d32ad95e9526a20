use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::PersistenceError;
use crate::model::{BatchId, BatchState, BatchStatus, FileId, FileRecord};
use crate::persistence::{DownloadsPersistence, MemoryStore, StoredBatch};

/// Wraps a store and fails the next N writes. Reads always pass through.
pub struct FlakyPersistence {
    inner: Arc<dyn DownloadsPersistence>,
    failing_writes: AtomicUsize,
    failing_batch_removals: AtomicUsize,
    failed: AtomicUsize,
}

impl Default for FlakyPersistence {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }
}

impl FlakyPersistence {
    pub fn new(inner: Arc<dyn DownloadsPersistence>) -> Self {
        Self {
            inner,
            failing_writes: AtomicUsize::new(0),
            failing_batch_removals: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` calls to `delete_batch` only; other writes pass.
    pub fn fail_next_batch_removals(&self, n: usize) {
        self.failing_batch_removals.store(n, Ordering::SeqCst);
    }

    /// Writes rejected so far.
    pub fn failed_writes(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    fn write_gate(&self) -> Result<(), PersistenceError> {
        self.gate(&self.failing_writes)
    }

    fn gate(&self, counter: &AtomicUsize) -> Result<(), PersistenceError> {
        let fail = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(PersistenceError("database is locked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DownloadsPersistence for FlakyPersistence {
    async fn persist_batch(
        &self,
        batch: &BatchStatus,
        files: &[FileRecord],
    ) -> Result<(), PersistenceError> {
        self.write_gate()?;
        self.inner.persist_batch(batch, files).await
    }

    async fn mark_deleting(
        &self,
        batch: &BatchStatus,
        files: &[FileRecord],
        remove_files: bool,
    ) -> Result<(), PersistenceError> {
        self.write_gate()?;
        self.inner.mark_deleting(batch, files, remove_files).await
    }

    async fn update_batch(&self, batch: &BatchStatus) -> Result<(), PersistenceError> {
        self.write_gate()?;
        self.inner.update_batch(batch).await
    }

    async fn update_file(&self, file: &FileRecord) -> Result<(), PersistenceError> {
        self.write_gate()?;
        self.inner.update_file(file).await
    }

    async fn load_batches(&self) -> Result<Vec<StoredBatch>, PersistenceError> {
        self.inner.load_batches().await
    }

    async fn load_batch(&self, id: &BatchId) -> Result<Option<StoredBatch>, PersistenceError> {
        self.inner.load_batch(id).await
    }

    async fn query_by_status(&self, state: BatchState) -> Result<Vec<BatchStatus>, PersistenceError> {
        self.inner.query_by_status(state).await
    }

    async fn delete_file(&self, batch_id: &BatchId, file_id: &FileId) -> Result<(), PersistenceError> {
        self.write_gate()?;
        self.inner.delete_file(batch_id, file_id).await
    }

    async fn delete_batch(&self, id: &BatchId) -> Result<(), PersistenceError> {
        self.write_gate()?;
        self.gate(&self.failing_batch_removals)?;
        self.inner.delete_batch(id).await
    }

    async fn set_notification_seen(&self, id: &BatchId, seen: bool) -> Result<(), PersistenceError> {
        self.write_gate()?;
        self.inner.set_notification_seen(id, seen).await
    }
}
