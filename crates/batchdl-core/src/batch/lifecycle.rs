//! Batch lifecycle: download, pause, resume, delete.

use std::sync::Arc;

use super::DownloadBatch;
use crate::control::StopReason;
use crate::download_file::DownloadFile;
use crate::error::{DownloadError, PersistenceError};
use crate::model::{BatchState, BatchStatus, FileStatus};

/// How a call to `download` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every file the run picked up settled; carries the resulting state.
    Finished(BatchState),
    /// The run was cancelled before every file settled.
    Stopped(StopReason),
    /// A requirement rule or the connection check kept the batch (or its
    /// remaining files) queued.
    Blocked(String),
    /// Nothing to run.
    Idle,
}

impl DownloadBatch {
    fn has_pending(&self) -> bool {
        self.files
            .iter()
            .any(|f| matches!(f.status(), FileStatus::Queued | FileStatus::Downloading))
    }

    /// Gate on requirements and connectivity, then drive the queued files.
    pub(crate) async fn download(self: &Arc<Self>) -> RunOutcome {
        let _run = self.run_lock.lock().await;
        let token = self.control.token();
        if token.is_cancelled() {
            return self
                .control
                .reason()
                .map_or(RunOutcome::Idle, RunOutcome::Stopped);
        }
        if !self.has_pending() {
            return RunOutcome::Idle;
        }

        let status = self.status();
        let files = self.file_statuses();
        let gate = match self.ctx.rules.check(&status, &files).await {
            Ok(()) => self.ctx.connection.check(),
            Err(reason) => Err(reason),
        };
        if let Err(reason) = gate {
            tracing::info!(batch_id = %self.id, %reason, "batch kept queued");
            self.set_reason(Some(reason.clone()));
            self.publish();
            return RunOutcome::Blocked(reason);
        }
        self.set_reason(None);

        tracing::info!(batch_id = %self.id, files = files.len(), "batch run started");
        self.ctx.downloader.run(self, &token).await;

        self.persist_status().await;
        self.publish_final();
        let state = self.status().state;
        match self.control.reason() {
            Some(StopReason::Requirement) if token.is_cancelled() => {
                let reason = self.status().reason.unwrap_or_default();
                tracing::info!(batch_id = %self.id, %reason, "batch run stopped by a requirement");
                RunOutcome::Blocked(reason)
            }
            Some(reason) if token.is_cancelled() => {
                tracing::info!(batch_id = %self.id, ?reason, "batch run stopped");
                RunOutcome::Stopped(reason)
            }
            _ => {
                tracing::info!(batch_id = %self.id, state = state.as_str(), "batch run finished");
                RunOutcome::Finished(state)
            }
        }
    }

    /// Cancel in-flight work and mark every unfinished file PAUSED once it has unwound.
    pub(crate) async fn pause(&self) -> BatchStatus {
        self.control.stop(StopReason::User);
        let _run = self.run_lock.lock().await;
        for file in &self.files {
            if matches!(file.status(), FileStatus::Queued | FileStatus::Downloading) {
                file.set_status(FileStatus::Paused);
                self.persist_file(file).await;
            }
        }
        self.set_reason(None);
        self.persist_status().await;
        self.publish();
        tracing::info!(batch_id = %self.id, "batch paused");
        self.status()
    }

    /// Re-queue PAUSED files and allow `download` again. False when nothing was paused.
    pub(crate) async fn resume(&self) -> bool {
        let any_paused = || {
            self.files
                .iter()
                .any(|f| matches!(f.status(), FileStatus::Paused))
        };
        if !self.control.is_stopped() && !any_paused() {
            return false;
        }
        let _run = self.run_lock.lock().await;
        self.control.rearm();
        let mut resumed = false;
        for file in &self.files {
            if matches!(file.status(), FileStatus::Paused) {
                file.set_status(FileStatus::Queued);
                self.persist_file(file).await;
                resumed = true;
            }
        }
        self.publish();
        tracing::info!(batch_id = %self.id, resumed, "batch resumed");
        resumed || self.has_pending()
    }

    /// Two-phase delete. Nothing is removed until the DELETING mark is stored;
    /// if that write fails the files keep their previous status and the error
    /// is returned. Ends DELETED only once every file's data (when
    /// `remove_files`) and record and then the batch record were removed. Files
    /// that could not be removed end in ERROR naming all of them; a batch record
    /// that could not be removed leaves the batch DELETING, so a later delete or
    /// the next start finishes it.
    pub(crate) async fn delete(&self, remove_files: bool) -> Result<BatchStatus, PersistenceError> {
        self.control.stop(StopReason::Delete);
        let _run = self.run_lock.lock().await;

        let previous: Vec<FileStatus> = self.files.iter().map(DownloadFile::status).collect();
        for file in &self.files {
            if !matches!(file.status(), FileStatus::Deleted) {
                file.set_status(FileStatus::Deleting);
            }
        }
        if let Err(e) = self.persist_deleting(remove_files).await {
            for (file, status) in self.files.iter().zip(previous) {
                file.set_status(status);
            }
            self.publish();
            tracing::warn!(batch_id = %self.id, error = %e, "delete not started, DELETING mark not stored");
            return Err(e);
        }
        self.publish();

        let mut failed = Vec::new();
        for file in &self.files {
            if matches!(file.status(), FileStatus::Deleted) {
                continue;
            }
            let record = file.snapshot();
            if remove_files {
                if let Err(e) = self.ctx.storage.delete(&record.path).await {
                    tracing::warn!(batch_id = %self.id, file_id = %record.id, error = %e, "could not delete file data");
                    failed.push(record.id);
                    continue;
                }
            }
            if let Err(e) = self.ctx.persistence.delete_file(&self.id, &record.id).await {
                self.report_persistence_failure(&e);
                failed.push(record.id);
                continue;
            }
            file.set_status(FileStatus::Deleted);
        }

        if !failed.is_empty() {
            let error = DownloadError::DeleteFailed {
                files: failed.clone(),
            };
            for file in self.files.iter().filter(|f| failed.contains(&f.id())) {
                file.set_status(FileStatus::Error(error.clone()));
                self.persist_file(file).await;
            }
            tracing::warn!(batch_id = %self.id, failed = failed.len(), "batch delete incomplete");
        } else {
            match self.ctx.persistence.delete_batch(&self.id).await {
                Ok(()) => {
                    self.mark_removed();
                    tracing::info!(batch_id = %self.id, remove_files, "batch deleted");
                }
                Err(e) => {
                    self.report_persistence_failure(&e);
                    tracing::warn!(batch_id = %self.id, error = %e, "batch record not removed, delete stays pending");
                }
            }
        }
        self.publish_final();
        Ok(self.status())
    }

    pub(crate) async fn mark_notification_seen(&self) -> Result<(), PersistenceError> {
        self.set_notification_seen(true);
        let result = self.ctx.persistence.set_notification_seen(&self.id, true).await;
        if let Err(e) = &result {
            self.report_persistence_failure(e);
        }
        self.publish();
        result
    }

    /// Crash recovery: files recorded DOWNLOADING go back to QUEUED.
    pub(crate) async fn reset_interrupted(&self) {
        for file in &self.files {
            if matches!(file.status(), FileStatus::Downloading) {
                file.set_status(FileStatus::Queued);
                self.persist_file(file).await;
            }
        }
    }

    /// Stop the batch for manager shutdown and wait for its run to unwind.
    pub(crate) async fn shutdown(&self) {
        self.control.stop(StopReason::Shutdown);
        let _run = self.run_lock.lock().await;
    }
}
