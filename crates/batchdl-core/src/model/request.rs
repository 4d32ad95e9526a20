//! Batch submission requests and their validation.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use super::{BatchId, BatchState, BatchStatus, FileId, FileRecord, FileSize, FileStatus};

/// One file of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    pub address: String,
    /// Relative to the batch storage root.
    pub destination: PathBuf,
    /// Size known up front, skipping the size probe.
    pub size: Option<u64>,
}

/// A batch submission: title, storage root and the files to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    /// Caller-assigned id; a UUID is generated when absent.
    pub batch_id: Option<BatchId>,
    pub title: String,
    pub storage_root: PathBuf,
    pub files: Vec<FileRequest>,
}

impl BatchRequest {
    pub fn new(title: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            batch_id: None,
            title: title.into(),
            storage_root: storage_root.into(),
            files: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<BatchId>) -> Self {
        self.batch_id = Some(id.into());
        self
    }

    pub fn file(mut self, address: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        self.files.push(FileRequest {
            address: address.into(),
            destination: destination.into(),
            size: None,
        });
        self
    }

    pub fn file_with_size(
        mut self,
        address: impl Into<String>,
        destination: impl Into<PathBuf>,
        size: u64,
    ) -> Self {
        self.files.push(FileRequest {
            address: address.into(),
            destination: destination.into(),
            size: Some(size),
        });
        self
    }

    /// Checks title, file count and destinations. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("batch title is empty".to_string());
        }
        if self.files.is_empty() {
            return Err("batch has no files".to_string());
        }
        let mut seen = HashSet::new();
        for file in &self.files {
            if file.address.trim().is_empty() {
                return Err(format!(
                    "file {} has an empty address",
                    file.destination.display()
                ));
            }
            if !is_contained(&file.destination) {
                return Err(format!(
                    "destination {} must be relative and stay inside the storage root",
                    file.destination.display()
                ));
            }
            if !seen.insert(file.destination.as_path()) {
                return Err(format!(
                    "destination {} appears more than once",
                    file.destination.display()
                ));
            }
        }
        Ok(())
    }

    /// Build the initial QUEUED batch snapshot and file records.
    /// Call `validate` first; the id is generated here if the request has none.
    pub fn into_records(self, created_at: i64) -> (BatchStatus, Vec<FileRecord>) {
        let id = self.batch_id.unwrap_or_else(BatchId::generate);
        let files: Vec<FileRecord> = self
            .files
            .into_iter()
            .map(|f| FileRecord {
                id: FileId::derive(&id, &f.destination),
                batch_id: id.clone(),
                address: f.address,
                path: self.storage_root.join(&f.destination),
                status: FileStatus::Queued,
                bytes_downloaded: 0,
                size: FileSize::from(f.size),
            })
            .collect();
        let total: FileSize = files
            .iter()
            .map(|f| f.size.known())
            .sum::<Option<u64>>()
            .into();
        let status = BatchStatus {
            id,
            title: self.title,
            storage_root: self.storage_root,
            created_at,
            state: BatchState::Queued,
            bytes_downloaded: 0,
            bytes_total: total,
            error: None,
            notification_seen: false,
            reason: None,
        };
        (status, files)
    }
}

fn is_contained(destination: &Path) -> bool {
    let mut depth = 0usize;
    for component in destination.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    depth > 0
}
