//! One network resource mapped to one local destination.
//!
//! `DownloadFile` owns the mutable record of a file. A single attempt probes the
//! size when unknown, opens the temp file at the recorded offset, fetches from
//! that offset, and streams chunks until the body ends, the run is cancelled,
//! or connectivity drops. Retrying and the final status are up to the
//! downloader driving it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::batch::DownloadBatch;
use crate::control::StopReason;
use crate::error::{DownloadError, NetworkError, NetworkErrorKind};
use crate::model::{FileId, FileRecord, FileSize, FileStatus};
use crate::storage::FileWriter;

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Attempt {
    /// Body complete and moved onto the destination.
    Completed,
    /// Cancellation observed (pause, delete, lost connectivity).
    Stopped,
    Failed(DownloadError),
}

pub struct DownloadFile {
    record: Mutex<FileRecord>,
    last_persist: Mutex<Option<Instant>>,
    /// Set when a progress write failed; the next progress point writes regardless of interval.
    persist_pending: AtomicBool,
}

impl DownloadFile {
    pub fn new(record: FileRecord) -> Self {
        Self {
            record: Mutex::new(record),
            last_persist: Mutex::new(None),
            persist_pending: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FileRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> FileId {
        self.lock().id.clone()
    }

    pub fn snapshot(&self) -> FileRecord {
        self.lock().clone()
    }

    pub fn status(&self) -> FileStatus {
        self.lock().status.clone()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut FileRecord) -> R) -> R {
        f(&mut self.lock())
    }

    pub(crate) fn set_status(&self, status: FileStatus) {
        self.update(|r| r.status = status);
    }

    /// Whether a progress write is due now.
    pub(crate) fn persist_due(&self, now: Instant, interval: std::time::Duration) -> bool {
        if self.persist_pending.load(Ordering::Acquire) {
            return true;
        }
        let last = self.last_persist.lock().unwrap_or_else(PoisonError::into_inner);
        last.map_or(true, |t| now.duration_since(t) >= interval)
    }

    pub(crate) fn mark_persisted(&self, at: Instant) {
        *self.last_persist.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
        self.persist_pending.store(false, Ordering::Release);
    }

    pub(crate) fn mark_persist_failed(&self) {
        self.persist_pending.store(true, Ordering::Release);
    }

    /// One transfer attempt. Leaves the record DOWNLOADING; the caller settles it.
    pub(crate) async fn attempt(&self, batch: &DownloadBatch, token: &CancellationToken) -> Attempt {
        let span = tracing::debug_span!("file", batch_id = %batch.id(), file_id = %self.id());
        self.transfer(batch, token).instrument(span).await
    }

    async fn transfer(&self, batch: &DownloadBatch, token: &CancellationToken) -> Attempt {
        let ctx = batch.context();
        let FileRecord {
            address,
            path,
            bytes_downloaded: recorded,
            mut size,
            ..
        } = self.snapshot();

        if !matches!(self.status(), FileStatus::Downloading) {
            self.set_status(FileStatus::Downloading);
            batch.file_changed(self).await;
        }

        if !size.is_known() {
            let probed = tokio::select! {
                biased;
                _ = token.cancelled() => return Attempt::Stopped,
                r = ctx.fetcher.probe_size(&address) => r,
            };
            match probed {
                Ok(probed) => {
                    size = probed;
                    self.update(|r| r.size = probed);
                }
                Err(e) => return Attempt::Failed(e.into()),
            }
        }

        if let Some(total) = size.known() {
            if recorded >= total && ctx.storage.finalize(&path).await.is_ok() {
                self.update(|r| r.bytes_downloaded = total);
                return Attempt::Completed;
            }
        }

        let mut writer = match ctx.storage.open_writer(&path, recorded).await {
            Ok(w) => w,
            Err(e) => return Attempt::Failed(e.into()),
        };
        let mut offset = writer.offset();
        if offset != recorded {
            tracing::info!(recorded, offset, "temp file shorter than recorded progress, restarting");
            self.update(|r| r.bytes_downloaded = offset);
        }

        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => return Attempt::Stopped,
            r = ctx.fetcher.fetch(&address, (offset > 0).then_some(offset)) => r,
        };
        let response = match fetched {
            Ok(r) => r,
            Err(e) => return Attempt::Failed(e.into()),
        };

        if response.start_offset != offset {
            tracing::info!(
                requested = offset,
                served = response.start_offset,
                "range not honoured, restarting from zero"
            );
            drop(writer);
            writer = match ctx.storage.open_writer(&path, 0).await {
                Ok(w) => w,
                Err(e) => return Attempt::Failed(e.into()),
            };
            offset = 0;
            self.update(|r| r.bytes_downloaded = 0);
        }
        if let (FileSize::Unknown, Some(total)) = (size, response.total_size) {
            size = FileSize::Known(total);
            self.update(|r| r.size = size);
        }

        let mut stream = response.stream;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return self.unwind(batch, &mut writer, Attempt::Stopped).await;
                }
                c = stream.next_chunk() => c,
            };
            match next {
                Ok(Some(chunk)) => {
                    if let Err(e) = writer.write_chunk(&chunk).await {
                        return Attempt::Failed(e.into());
                    }
                    offset += chunk.len() as u64;
                    self.update(|r| r.bytes_downloaded = offset);
                    batch.file_progress(self).await;

                    if let Err(reason) = ctx.connection.check() {
                        tracing::info!(%reason, "connectivity lost mid-transfer");
                        batch.control().stop(StopReason::ConnectionLost);
                        return self.unwind(batch, &mut writer, Attempt::Stopped).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    return self.unwind(batch, &mut writer, Attempt::Failed(e.into())).await;
                }
            }
        }

        if let Err(e) = writer.sync().await {
            return Attempt::Failed(e.into());
        }
        drop(writer);

        match size.known() {
            Some(total) if offset < total => {
                return Attempt::Failed(DownloadError::Network(NetworkError::new(
                    NetworkErrorKind::ConnectionLost,
                    format!("partial transfer: {offset} of {total} bytes"),
                )));
            }
            Some(_) => {}
            None => self.update(|r| r.size = FileSize::Known(offset)),
        }

        if let Err(e) = ctx.storage.finalize(&path).await {
            return Attempt::Failed(e.into());
        }
        tracing::debug!(bytes = offset, "file complete");
        Attempt::Completed
    }

    /// Flush what was written so the recorded offset matches the temp file.
    async fn unwind(
        &self,
        batch: &DownloadBatch,
        writer: &mut Box<dyn FileWriter>,
        outcome: Attempt,
    ) -> Attempt {
        if let Err(e) = writer.sync().await {
            tracing::warn!(error = %e, "sync on unwind failed");
        }
        batch.persist_file(self).await;
        outcome
    }
}
