//! The batch aggregate: owns its files, derives its status, persists and
//! publishes changes.
//!
//! Lifecycle operations (download, pause, resume, delete) live in `lifecycle`.

mod lifecycle;

pub use lifecycle::RunOutcome;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;

use crate::context::EngineContext;
use crate::control::TransferControl;
use crate::download_file::DownloadFile;
use crate::error::PersistenceError;
use crate::event::DownloadEvent;
use crate::model::{aggregate, BatchId, BatchState, BatchStatus, FileRecord, FileStatus};
use crate::throttle::EventGate;

/// Batch fields that are not derived from its files.
struct BatchMeta {
    title: String,
    storage_root: PathBuf,
    created_at: i64,
    notification_seen: bool,
    reason: Option<String>,
    /// The batch record is gone from persistence.
    removed: bool,
}

pub struct DownloadBatch {
    id: BatchId,
    meta: Mutex<BatchMeta>,
    files: Vec<DownloadFile>,
    control: TransferControl,
    /// Held for the whole of a run; pause and delete take it to wait for the run to unwind.
    run_lock: tokio::sync::Mutex<()>,
    gate: Mutex<EventGate>,
    ctx: Arc<EngineContext>,
}

impl DownloadBatch {
    pub(crate) fn new(status: BatchStatus, files: Vec<FileRecord>, ctx: Arc<EngineContext>) -> Self {
        let gate = EventGate::new(ctx.throttle.build());
        Self {
            id: status.id,
            meta: Mutex::new(BatchMeta {
                title: status.title,
                storage_root: status.storage_root,
                created_at: status.created_at,
                notification_seen: status.notification_seen,
                reason: None,
                removed: false,
            }),
            files: files.into_iter().map(DownloadFile::new).collect(),
            control: TransferControl::new(),
            run_lock: tokio::sync::Mutex::new(()),
            gate: Mutex::new(gate),
            ctx,
        }
    }

    pub fn id(&self) -> &BatchId {
        &self.id
    }

    pub(crate) fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub(crate) fn control(&self) -> &TransferControl {
        &self.control
    }

    pub(crate) fn files(&self) -> &[DownloadFile] {
        &self.files
    }

    fn meta(&self) -> std::sync::MutexGuard<'_, BatchMeta> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_reason(&self, reason: Option<String>) {
        self.meta().reason = reason;
    }

    /// Per-file snapshots in submission order.
    pub fn file_statuses(&self) -> Vec<FileRecord> {
        self.files.iter().map(DownloadFile::snapshot).collect()
    }

    /// Immutable snapshot; state, error and byte counts are derived from the files.
    /// DELETED additionally needs the batch record removed; until then a batch
    /// whose files are all gone reads DELETING.
    pub fn status(&self) -> BatchStatus {
        let files = self.file_statuses();
        let agg = aggregate(&files);
        let meta = self.meta();
        let state = match agg.state {
            _ if meta.removed => BatchState::Deleted,
            BatchState::Deleted => BatchState::Deleting,
            state => state,
        };
        BatchStatus {
            id: self.id.clone(),
            title: meta.title.clone(),
            storage_root: meta.storage_root.clone(),
            created_at: meta.created_at,
            state,
            bytes_downloaded: agg.bytes_downloaded,
            bytes_total: agg.bytes_total,
            error: agg.error,
            notification_seen: meta.notification_seen,
            reason: meta.reason.clone(),
        }
    }

    /// Send the current snapshot through the throttle gate.
    pub(crate) fn publish(&self) {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let status = self.status();
        if gate.admit(&status) {
            self.ctx.emit(DownloadEvent::Batch(status));
        }
    }

    /// Send the current snapshot unless it was already delivered.
    pub(crate) fn publish_final(&self) {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let status = self.status();
        if gate.admit_final(&status) {
            self.ctx.emit(DownloadEvent::Batch(status));
        }
    }

    fn report_persistence_failure(&self, e: &PersistenceError) {
        tracing::warn!(batch_id = %self.id, error = %e, "persistence write failed");
        self.ctx.emit(DownloadEvent::PersistenceFailed {
            batch_id: self.id.clone(),
            message: e.to_string(),
        });
    }

    /// Write the batch row. Failures are reported, never propagated.
    pub(crate) async fn persist_status(&self) -> bool {
        match self.ctx.persistence.update_batch(&self.status()).await {
            Ok(()) => true,
            Err(e) => {
                self.report_persistence_failure(&e);
                false
            }
        }
    }

    /// Write a file row and the batch row now.
    pub(crate) async fn persist_file(&self, file: &DownloadFile) {
        let record = file.snapshot();
        let written = match self.ctx.persistence.update_file(&record).await {
            Ok(()) => self.persist_status().await,
            Err(e) => {
                self.report_persistence_failure(&e);
                false
            }
        };
        if written {
            file.mark_persisted(Instant::now());
        } else {
            file.mark_persist_failed();
        }
    }

    /// A file changed status: persist immediately and publish.
    pub(crate) async fn file_changed(&self, file: &DownloadFile) {
        self.persist_file(file).await;
        self.publish();
    }

    /// A file made progress: persist when the interval has passed, publish through the throttle.
    pub(crate) async fn file_progress(&self, file: &DownloadFile) {
        if file.persist_due(Instant::now(), self.ctx.persist_interval) {
            self.persist_file(file).await;
        }
        self.publish();
    }

    /// Record DELETING for the batch and every file still stored, in one transaction.
    pub(crate) async fn persist_deleting(&self, remove_files: bool) -> Result<(), PersistenceError> {
        let files: Vec<FileRecord> = self
            .file_statuses()
            .into_iter()
            .filter(|f| f.status != FileStatus::Deleted)
            .collect();
        let result = self
            .ctx
            .persistence
            .mark_deleting(&self.status(), &files, remove_files)
            .await;
        if let Err(e) = &result {
            self.report_persistence_failure(e);
        }
        result
    }

    pub(crate) fn mark_removed(&self) {
        self.meta().removed = true;
    }

    pub(crate) fn set_notification_seen(&self, seen: bool) {
        self.meta().notification_seen = seen;
    }
}

impl std::fmt::Debug for DownloadBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadBatch")
            .field("id", &self.id)
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}
