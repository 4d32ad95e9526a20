use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::StorageError;
use crate::storage::{temp_path, FileStorage, FileWriter};

type Files = Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>;

/// `FileStorage` backed by a map, with injectable delete failures and a
/// configurable amount of free space.
#[derive(Debug)]
pub struct MemoryFileStorage {
    files: Files,
    fail_delete: Mutex<HashSet<PathBuf>>,
    available: AtomicU64,
}

impl Default for MemoryFileStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileStorage {
    pub fn new() -> Self {
        Self {
            files: Arc::default(),
            fail_delete: Mutex::new(HashSet::new()),
            available: AtomicU64::new(u64::MAX),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Vec<u8>>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Finalized contents of `destination`.
    pub fn contents(&self, destination: &Path) -> Option<Vec<u8>> {
        self.lock().get(destination).cloned()
    }

    /// Contents of the temp file of an unfinished transfer.
    pub fn partial(&self, destination: &Path) -> Option<Vec<u8>> {
        self.lock().get(&temp_path(destination)).cloned()
    }

    pub fn put(&self, destination: &Path, data: Vec<u8>) {
        self.lock().insert(destination.to_path_buf(), data);
    }

    pub fn fail_delete(&self, destination: &Path) {
        self.fail_delete
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(destination.to_path_buf());
    }

    pub fn set_available(&self, bytes: u64) {
        self.available.store(bytes, Ordering::SeqCst);
    }
}

struct MemoryWriter {
    files: Files,
    key: PathBuf,
    offset: u64,
}

#[async_trait]
impl FileWriter for MemoryWriter {
    fn offset(&self) -> u64 {
        self.offset
    }

    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.entry(self.key.clone()).or_default().extend_from_slice(data);
        self.offset += data.len() as u64;
        Ok(())
    }

    async fn sync(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn open_writer(
        &self,
        destination: &Path,
        offset: u64,
    ) -> Result<Box<dyn FileWriter>, StorageError> {
        let key = temp_path(destination);
        let mut files = self.lock();
        let data = files.entry(key.clone()).or_default();
        let offset = if (data.len() as u64) < offset { 0 } else { offset };
        data.truncate(offset as usize);
        drop(files);
        Ok(Box::new(MemoryWriter {
            files: Arc::clone(&self.files),
            key,
            offset,
        }))
    }

    async fn finalize(&self, destination: &Path) -> Result<(), StorageError> {
        let mut files = self.lock();
        match files.remove(&temp_path(destination)) {
            Some(data) => {
                files.insert(destination.to_path_buf(), data);
                Ok(())
            }
            None if files.contains_key(destination) => Ok(()),
            None => Err(StorageError::write_failure(format!(
                "no data for {}",
                destination.display()
            ))),
        }
    }

    async fn delete(&self, destination: &Path) -> Result<(), StorageError> {
        let failing = self
            .fail_delete
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(destination);
        if failing {
            return Err(StorageError::write_failure(format!(
                "permission denied: {}",
                destination.display()
            )));
        }
        let mut files = self.lock();
        files.remove(destination);
        files.remove(&temp_path(destination));
        Ok(())
    }

    async fn available_space(&self, _root: &Path) -> Result<u64, StorageError> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}
