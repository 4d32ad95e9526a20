//! batchdl core: persistent, resumable downloads of batches of files.
//!
//! A `DownloadManager` owns live `DownloadBatch`es. Each batch drives its
//! files through a `FilesDownloader` against pluggable ports: a `FileFetcher`
//! for the network, a `FileStorage` for local data, a `DownloadsPersistence`
//! for durable records and a `ConnectivityMonitor` for the network type.

pub mod batch;
pub mod config;
pub mod connection;
mod context;
pub mod control;
pub mod download_file;
pub mod downloader;
pub mod error;
pub mod event;
pub mod logging;
pub mod manager;
pub mod model;
pub mod network;
pub mod persistence;
pub mod requirement;
pub mod retry;
pub mod storage;
pub mod throttle;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use batch::{DownloadBatch, RunOutcome};
pub use config::BatchdlConfig;
pub use connection::{AllowedConnection, ConnectivityMonitor, NetworkType};
pub use error::{DownloadError, ManagerError, NetworkError, NetworkErrorKind, PersistenceError, StorageError};
pub use event::DownloadEvent;
pub use manager::{DownloadManager, DownloadManagerBuilder, Subscription};
pub use model::{BatchId, BatchRequest, BatchState, BatchStatus, FileId, FileRecord, FileSize, FileStatus};
