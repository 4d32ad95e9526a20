//! In-process store. Nothing survives the process; used by tests and by hosts
//! that keep their own records.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{DownloadsPersistence, StoredBatch};
use crate::error::PersistenceError;
use crate::model::{BatchId, BatchState, BatchStatus, FileId, FileRecord};

#[derive(Debug, Default)]
pub struct MemoryStore {
    batches: Mutex<HashMap<BatchId, StoredBatch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<BatchId, StoredBatch>) -> R) -> R {
        let mut guard = self.batches.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

fn oldest_first(batches: &mut [StoredBatch]) {
    batches.sort_by(|a, b| {
        (a.status.created_at, &a.status.id).cmp(&(b.status.created_at, &b.status.id))
    });
}

#[async_trait]
impl DownloadsPersistence for MemoryStore {
    async fn persist_batch(
        &self,
        batch: &BatchStatus,
        files: &[FileRecord],
    ) -> Result<(), PersistenceError> {
        self.with(|m| {
            let remove_files = m.get(&batch.id).is_some_and(|b| b.remove_files);
            let stored = StoredBatch {
                status: BatchStatus {
                    reason: None,
                    ..batch.clone()
                },
                files: files.to_vec(),
                remove_files,
            };
            m.insert(batch.id.clone(), stored);
        });
        Ok(())
    }

    async fn mark_deleting(
        &self,
        batch: &BatchStatus,
        files: &[FileRecord],
        remove_files: bool,
    ) -> Result<(), PersistenceError> {
        self.persist_batch(batch, files).await?;
        self.with(|m| {
            if let Some(b) = m.get_mut(&batch.id) {
                b.remove_files = remove_files;
            }
        });
        Ok(())
    }

    async fn update_batch(&self, batch: &BatchStatus) -> Result<(), PersistenceError> {
        self.with(|m| {
            if let Some(stored) = m.get_mut(&batch.id) {
                stored.status = BatchStatus {
                    reason: None,
                    ..batch.clone()
                };
            }
        });
        Ok(())
    }

    async fn update_file(&self, file: &FileRecord) -> Result<(), PersistenceError> {
        self.with(|m| {
            if let Some(slot) = m
                .get_mut(&file.batch_id)
                .and_then(|b| b.files.iter_mut().find(|f| f.id == file.id))
            {
                *slot = file.clone();
            }
        });
        Ok(())
    }

    async fn load_batches(&self) -> Result<Vec<StoredBatch>, PersistenceError> {
        let mut all: Vec<StoredBatch> = self.with(|m| m.values().cloned().collect());
        oldest_first(&mut all);
        Ok(all)
    }

    async fn load_batch(&self, id: &BatchId) -> Result<Option<StoredBatch>, PersistenceError> {
        Ok(self.with(|m| m.get(id).cloned()))
    }

    async fn query_by_status(&self, state: BatchState) -> Result<Vec<BatchStatus>, PersistenceError> {
        let mut matching: Vec<StoredBatch> = self.with(|m| {
            m.values()
                .filter(|b| b.status.state == state)
                .cloned()
                .collect()
        });
        oldest_first(&mut matching);
        Ok(matching.into_iter().map(|b| b.status).collect())
    }

    async fn delete_file(
        &self,
        batch_id: &BatchId,
        file_id: &FileId,
    ) -> Result<(), PersistenceError> {
        self.with(|m| {
            if let Some(b) = m.get_mut(batch_id) {
                b.files.retain(|f| &f.id != file_id);
            }
        });
        Ok(())
    }

    async fn delete_batch(&self, id: &BatchId) -> Result<(), PersistenceError> {
        self.with(|m| m.remove(id));
        Ok(())
    }

    async fn set_notification_seen(&self, id: &BatchId, seen: bool) -> Result<(), PersistenceError> {
        self.with(|m| {
            if let Some(b) = m.get_mut(id) {
                b.status.notification_seen = seen;
            }
        });
        Ok(())
    }
}
