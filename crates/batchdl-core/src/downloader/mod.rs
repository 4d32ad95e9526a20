//! Files downloaders: drive the queued files of a batch to a settled state.
//!
//! Both strategies share `drive_file`, which owns the retry loop of one file.
//! They differ only in how many files are in flight: one at a time in
//! submission order, or up to a bound at once.

mod concurrent;
mod sequential;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::batch::DownloadBatch;
use crate::config::BatchdlConfig;
use crate::control::StopReason;
use crate::download_file::{Attempt, DownloadFile};
use crate::error::DownloadError;
use crate::model::FileStatus;
use crate::retry::RetryDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesDownloader {
    /// One active transfer, strict submission order.
    Sequential,
    /// Up to `max_parallel` transfers at once.
    Concurrent { max_parallel: usize },
}

impl FilesDownloader {
    pub fn from_config(cfg: &BatchdlConfig) -> Self {
        if cfg.concurrent_file_downloading {
            FilesDownloader::Concurrent {
                max_parallel: cfg.max_parallel_files.max(1),
            }
        } else {
            FilesDownloader::Sequential
        }
    }

    /// Drive every QUEUED file until it settles or `token` is cancelled.
    pub(crate) async fn run(&self, batch: &Arc<DownloadBatch>, token: &CancellationToken) {
        let pending: Vec<usize> = batch
            .files()
            .iter()
            .enumerate()
            .filter(|(_, f)| matches!(f.status(), FileStatus::Queued | FileStatus::Downloading))
            .map(|(i, _)| i)
            .collect();
        match *self {
            FilesDownloader::Sequential => sequential::run(batch, pending, token).await,
            FilesDownloader::Concurrent { max_parallel } => {
                concurrent::run(batch, pending, token, max_parallel).await
            }
        }
        settle_leftovers(batch, token).await;
    }
}

/// Status of a file whose run was cancelled. Shutdown and a failed requirement
/// leave it queued so the next start or resume picks it up again.
fn stopped_status(batch: &DownloadBatch) -> FileStatus {
    match batch.control().reason() {
        Some(StopReason::Shutdown | StopReason::Requirement) => FileStatus::Queued,
        _ => FileStatus::Paused,
    }
}

/// Re-check the requirement rules before another file starts. A rule that no
/// longer holds stops the batch and becomes its reason.
async fn rules_hold(batch: &DownloadBatch) -> bool {
    let status = batch.status();
    let files = batch.file_statuses();
    match batch.context().rules.check(&status, &files).await {
        Ok(()) => true,
        Err(reason) => {
            tracing::info!(batch_id = %batch.id(), %reason, "requirement no longer met, stopping batch");
            batch.set_reason(Some(reason));
            batch.control().stop(StopReason::Requirement);
            false
        }
    }
}

async fn settle(batch: &DownloadBatch, file: &DownloadFile, status: FileStatus) {
    file.set_status(status);
    batch.file_changed(file).await;
}

pub(crate) fn worker_lost() -> DownloadError {
    DownloadError::Unknown {
        message: "download worker stopped unexpectedly".to_string(),
    }
}

/// After all workers are done: files never started because of cancellation get
/// the stopped status, and a file still DOWNLOADING lost its worker.
async fn settle_leftovers(batch: &DownloadBatch, token: &CancellationToken) {
    for file in batch.files() {
        match file.status() {
            FileStatus::Downloading => {
                tracing::error!(batch_id = %batch.id(), file_id = %file.id(), "file left downloading by its worker");
                settle(batch, file, FileStatus::Error(worker_lost())).await;
            }
            FileStatus::Queued if token.is_cancelled() => {
                let status = stopped_status(batch);
                if status != FileStatus::Queued {
                    settle(batch, file, status).await;
                }
            }
            _ => {}
        }
    }
}

/// Retry loop of one file. Connectivity is checked before every attempt and
/// before every backoff; losing it stops the whole batch.
pub(crate) async fn drive_file(batch: &DownloadBatch, file: &DownloadFile, token: &CancellationToken) {
    let ctx = batch.context();
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return settle(batch, file, stopped_status(batch)).await;
        }
        if let Err(reason) = ctx.connection.check() {
            tracing::info!(batch_id = %batch.id(), file_id = %file.id(), %reason, "connectivity lost, stopping batch");
            batch.control().stop(StopReason::ConnectionLost);
            return settle(batch, file, stopped_status(batch)).await;
        }

        attempt += 1;
        let err = match file.attempt(batch, token).await {
            Attempt::Completed => return settle(batch, file, FileStatus::Downloaded).await,
            Attempt::Stopped => return settle(batch, file, stopped_status(batch)).await,
            Attempt::Failed(err) => err,
        };

        let delay = match ctx.retry.decide(attempt, &err) {
            RetryDecision::RetryAfter(delay) => delay,
            RetryDecision::NoRetry => {
                tracing::warn!(batch_id = %batch.id(), file_id = %file.id(), attempt, error = %err, "file failed");
                return settle(batch, file, FileStatus::Error(err)).await;
            }
        };
        if let Err(reason) = ctx.connection.check() {
            tracing::info!(batch_id = %batch.id(), file_id = %file.id(), %reason, "connectivity lost, stopping batch");
            batch.control().stop(StopReason::ConnectionLost);
            return settle(batch, file, stopped_status(batch)).await;
        }
        tracing::info!(batch_id = %batch.id(), file_id = %file.id(), attempt, ?delay, error = %err, "retrying file");
        tokio::select! {
            biased;
            _ = token.cancelled() => return settle(batch, file, stopped_status(batch)).await,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
