//! Local file data: writers at an offset, atomic finalize, deletion, free space.
//!
//! Transfers write into `<destination>.part` and are renamed onto the
//! destination once complete, so a partially written file never appears under
//! its final name.

mod local;

pub use local::LocalStorage;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Sequential writer over the temp file of one transfer.
#[async_trait]
pub trait FileWriter: Send {
    /// Byte offset the next chunk lands at. May be lower than requested when the
    /// temp file held fewer bytes than the transfer recorded.
    fn offset(&self) -> u64;

    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), StorageError>;

    /// Flush written data to disk.
    async fn sync(&mut self) -> Result<(), StorageError>;
}

/// Storage port for file data.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Open the temp file for `destination`, keeping the first `offset` bytes
    /// and discarding anything after them.
    async fn open_writer(
        &self,
        destination: &Path,
        offset: u64,
    ) -> Result<Box<dyn FileWriter>, StorageError>;

    /// Move the completed temp file onto `destination`.
    async fn finalize(&self, destination: &Path) -> Result<(), StorageError>;

    /// Remove `destination` and its temp file. Missing files are not an error.
    async fn delete(&self, destination: &Path) -> Result<(), StorageError>;

    /// Free bytes available to unprivileged writers under `root`.
    async fn available_space(&self, root: &Path) -> Result<u64, StorageError>;
}
