//! File and batch statuses, and the aggregation that derives one from the other.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{BatchId, FileId};
use crate::error::DownloadError;

/// Size of a remote file: known, or not yet resolved by the size probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileSize {
    Known(u64),
    Unknown,
}

impl FileSize {
    pub fn known(self) -> Option<u64> {
        match self {
            FileSize::Known(n) => Some(n),
            FileSize::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, FileSize::Known(_))
    }
}

impl From<Option<u64>> for FileSize {
    fn from(v: Option<u64>) -> Self {
        v.map_or(FileSize::Unknown, FileSize::Known)
    }
}

/// Status of a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Queued,
    Downloading,
    Paused,
    Downloaded,
    Deleting,
    Deleted,
    Error(DownloadError),
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Queued => "queued",
            FileStatus::Downloading => "downloading",
            FileStatus::Paused => "paused",
            FileStatus::Downloaded => "downloaded",
            FileStatus::Deleting => "deleting",
            FileStatus::Deleted => "deleted",
            FileStatus::Error(_) => "error",
        }
    }

    /// Rebuild a status from its stored string and optional stored error.
    pub fn from_parts(s: &str, error: Option<DownloadError>) -> Self {
        match s {
            "queued" => FileStatus::Queued,
            "downloading" => FileStatus::Downloading,
            "paused" => FileStatus::Paused,
            "downloaded" => FileStatus::Downloaded,
            "deleting" => FileStatus::Deleting,
            "deleted" => FileStatus::Deleted,
            other => FileStatus::Error(error.unwrap_or_else(|| DownloadError::Unknown {
                message: format!("unrecognised stored status: {other}"),
            })),
        }
    }

    pub fn error(&self) -> Option<&DownloadError> {
        match self {
            FileStatus::Error(e) => Some(e),
            _ => None,
        }
    }

    /// True once the file no longer needs a worker: finished, failed, deleted or paused.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            FileStatus::Downloaded
                | FileStatus::Deleted
                | FileStatus::Error(_)
                | FileStatus::Paused
        )
    }

    /// Position in `ERROR > DELETING > PAUSED > DOWNLOADING > QUEUED > DOWNLOADED`.
    fn rank(&self) -> u8 {
        match self {
            FileStatus::Downloaded => 0,
            FileStatus::Queued => 1,
            FileStatus::Downloading => 2,
            FileStatus::Paused => 3,
            FileStatus::Deleting | FileStatus::Deleted => 4,
            FileStatus::Error(_) => 5,
        }
    }
}

/// Aggregate state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Queued,
    Downloading,
    Paused,
    Downloaded,
    Deleting,
    Deleted,
    Error,
}

impl BatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchState::Queued => "queued",
            BatchState::Downloading => "downloading",
            BatchState::Paused => "paused",
            BatchState::Downloaded => "downloaded",
            BatchState::Deleting => "deleting",
            BatchState::Deleted => "deleted",
            BatchState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => BatchState::Queued,
            "downloading" => BatchState::Downloading,
            "paused" => BatchState::Paused,
            "downloaded" => BatchState::Downloaded,
            "deleting" => BatchState::Deleting,
            "deleted" => BatchState::Deleted,
            _ => BatchState::Error,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchState::Downloaded | BatchState::Deleted | BatchState::Error
        )
    }
}

/// Persistent and in-memory view of one file of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,
    pub batch_id: BatchId,
    pub address: String,
    /// Absolute local destination (storage root joined with the requested destination).
    pub path: PathBuf,
    pub status: FileStatus,
    pub bytes_downloaded: u64,
    pub size: FileSize,
}

/// Immutable snapshot of a batch, as delivered to subscribers and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStatus {
    pub id: BatchId,
    pub title: String,
    pub storage_root: PathBuf,
    /// Unix milliseconds.
    pub created_at: i64,
    pub state: BatchState,
    pub bytes_downloaded: u64,
    pub bytes_total: FileSize,
    pub error: Option<DownloadError>,
    pub notification_seen: bool,
    /// Why a queued batch is not running (failed requirement, no connection). Not persisted.
    pub reason: Option<String>,
}

impl BatchStatus {
    /// Whole-number progress percentage; `None` while the total is unresolved.
    pub fn percentage(&self) -> Option<u8> {
        let total = self.bytes_total.known()?;
        if total == 0 {
            return Some(100);
        }
        Some(((self.bytes_downloaded.min(total) * 100) / total) as u8)
    }
}

/// Derived batch fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub state: BatchState,
    pub error: Option<DownloadError>,
    pub bytes_downloaded: u64,
    pub bytes_total: FileSize,
}

/// Derive batch state from file statuses alone.
///
/// The maximum under `ERROR > DELETING > PAUSED > DOWNLOADING > QUEUED > DOWNLOADED`
/// wins; ERROR carries the first error in file order. DELETED ranks with DELETING
/// unless every file is DELETED. An empty batch is QUEUED.
pub fn aggregate_state<'a, I>(statuses: I) -> (BatchState, Option<DownloadError>)
where
    I: IntoIterator<Item = &'a FileStatus>,
{
    let mut top: Option<&FileStatus> = None;
    let mut all_deleted = true;
    let mut first_error = None;
    for status in statuses {
        if first_error.is_none() {
            first_error = status.error().cloned();
        }
        all_deleted &= matches!(status, FileStatus::Deleted);
        if top.map_or(true, |t| status.rank() > t.rank()) {
            top = Some(status);
        }
    }
    let state = match top {
        None => BatchState::Queued,
        Some(FileStatus::Error(_)) => BatchState::Error,
        Some(FileStatus::Deleting | FileStatus::Deleted) if all_deleted => BatchState::Deleted,
        Some(FileStatus::Deleting | FileStatus::Deleted) => BatchState::Deleting,
        Some(FileStatus::Paused) => BatchState::Paused,
        Some(FileStatus::Downloading) => BatchState::Downloading,
        Some(FileStatus::Queued) => BatchState::Queued,
        Some(FileStatus::Downloaded) => BatchState::Downloaded,
    };
    (state, first_error)
}

/// Derive every batch field from its files.
pub fn aggregate(files: &[FileRecord]) -> Aggregate {
    let (state, error) = aggregate_state(files.iter().map(|f| &f.status));
    let bytes_downloaded = files.iter().map(|f| f.bytes_downloaded).sum();
    let bytes_total: FileSize = files
        .iter()
        .map(|f| f.size.known())
        .sum::<Option<u64>>()
        .into();
    Aggregate {
        state,
        error,
        bytes_downloaded,
        bytes_total,
    }
}
