//! `FileStorage` on the local filesystem via tokio::fs.

use async_trait::async_trait;
use std::io::{ErrorKind, SeekFrom};
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::{temp_path, FileStorage, FileWriter};
use crate::error::StorageError;

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

struct LocalWriter {
    file: File,
    offset: u64,
}

#[async_trait]
impl FileWriter for LocalWriter {
    fn offset(&self) -> u64 {
        self.offset
    }

    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.file.write_all(data).await?;
        self.offset += data.len() as u64;
        Ok(())
    }

    async fn sync(&mut self) -> Result<(), StorageError> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn open_writer(
        &self,
        destination: &Path,
        offset: u64,
    ) -> Result<Box<dyn FileWriter>, StorageError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tp = temp_path(destination);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&tp)
            .await?;
        let existing = file.metadata().await?.len();
        // A temp file shorter than the recorded offset cannot be trusted; start over.
        let offset = if existing < offset { 0 } else { offset };
        file.set_len(offset).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        tracing::debug!(path = %tp.display(), offset, existing, "opened temp file");
        Ok(Box::new(LocalWriter { file, offset }))
    }

    async fn finalize(&self, destination: &Path) -> Result<(), StorageError> {
        let tp = temp_path(destination);
        fs::rename(&tp, destination).await.map_err(|e| {
            StorageError::write_failure(format!(
                "failed to rename {} to {}: {e}",
                tp.display(),
                destination.display()
            ))
        })
    }

    async fn delete(&self, destination: &Path) -> Result<(), StorageError> {
        remove_if_present(&temp_path(destination)).await?;
        remove_if_present(destination).await
    }

    async fn available_space(&self, root: &Path) -> Result<u64, StorageError> {
        // The storage root may not exist before the first file is written.
        let mut probe = root;
        while !fs::try_exists(probe).await.unwrap_or(false) {
            match probe.parent() {
                Some(parent) => probe = parent,
                None => break,
            }
        }
        free_bytes(probe)
    }
}

#[cfg(unix)]
fn free_bytes(path: &Path) -> Result<u64, StorageError> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| StorageError::write_failure(format!("invalid path: {e}")))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let r = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if r != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_bytes(_path: &Path) -> Result<u64, StorageError> {
    Ok(u64::MAX)
}
