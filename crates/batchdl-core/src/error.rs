//! Error taxonomy shared by the engine and its ports.
//!
//! Port errors (`NetworkError`, `StorageError`, `PersistenceError`) are
//! classified into a `DownloadError` once they reach a file or batch, so the
//! status stream only ever carries the serializable form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BatchId, FileId};

/// Kind of network failure reported by a `FileFetcher`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    /// Connect or read timed out.
    Timeout,
    /// Connection reset, DNS failure, short read.
    ConnectionLost,
    /// Server asked us to slow down (429, 503) or answered 5xx.
    Throttled,
    /// The resource is gone or forbidden (4xx). Not retried.
    PermanentResource,
    /// Address cannot be fetched at all (bad URL, unsupported scheme). Not retried.
    UnsupportedAddress,
}

/// Failure of a fetch or size probe.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    /// HTTP status code when the failure came from a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
}

impl NetworkError {
    pub fn new(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Classify an HTTP status code. Returns `None` for 2xx.
    pub fn from_http_status(code: u16) -> Option<Self> {
        let kind = match code {
            200..=299 => return None,
            408 => NetworkErrorKind::Timeout,
            429 | 500..=599 => NetworkErrorKind::Throttled,
            _ => NetworkErrorKind::PermanentResource,
        };
        Some(Self {
            kind,
            status: Some(code),
            message: format!("HTTP {code}"),
        })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            NetworkErrorKind::Timeout | NetworkErrorKind::ConnectionLost | NetworkErrorKind::Throttled
        )
    }
}

/// Local storage failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageError {
    #[error("insufficient space: needed {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },
    #[error("write failure: {message}")]
    WriteFailure { message: String },
}

impl StorageError {
    pub fn write_failure(message: impl Into<String>) -> Self {
        StorageError::WriteFailure {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        #[cfg(unix)]
        if e.raw_os_error() == Some(libc::ENOSPC) {
            return StorageError::InsufficientSpace {
                needed: 0,
                available: 0,
            };
        }
        StorageError::write_failure(e.to_string())
    }
}

/// Failure of the persistence gateway. Always recoverable by retrying the write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("persistence: {0}")]
pub struct PersistenceError(pub String);

impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        PersistenceError(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError(format!("json: {e}"))
    }
}

/// Classified error carried by a file or batch status.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadError {
    #[error("network: {0}")]
    Network(NetworkError),
    #[error("storage: {0}")]
    Storage(StorageError),
    #[error("requirement not met: {reason}")]
    RequirementNotMet { reason: String },
    #[error("persistence: {message}")]
    Persistence { message: String },
    #[error("could not delete file(s): {}", join_ids(files))]
    DeleteFailed { files: Vec<FileId> },
    #[error("unknown: {message}")]
    Unknown { message: String },
}

fn join_ids(files: &[FileId]) -> String {
    files
        .iter()
        .map(FileId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<NetworkError> for DownloadError {
    fn from(e: NetworkError) -> Self {
        DownloadError::Network(e)
    }
}

impl From<StorageError> for DownloadError {
    fn from(e: StorageError) -> Self {
        DownloadError::Storage(e)
    }
}

impl From<PersistenceError> for DownloadError {
    fn from(e: PersistenceError) -> Self {
        DownloadError::Persistence { message: e.0 }
    }
}

/// Errors returned by the `DownloadManager` API.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("batch {0} not found")]
    NotFound(BatchId),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("download manager has stopped")]
    Stopped,
}
