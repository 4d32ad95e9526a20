//! One file at a time, in submission order.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{drive_file, rules_hold, settle, worker_lost};
use crate::batch::DownloadBatch;
use crate::model::FileStatus;

/// Each file runs on its own task so a panicking transfer only fails that file.
/// A file ending in ERROR does not stop the files after it. Requirement rules
/// are checked again before every file after the first.
pub(super) async fn run(batch: &Arc<DownloadBatch>, pending: Vec<usize>, token: &CancellationToken) {
    for (n, index) in pending.into_iter().enumerate() {
        if token.is_cancelled() || (n > 0 && !rules_hold(batch).await) {
            break;
        }
        let task_batch = Arc::clone(batch);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let file = &task_batch.files()[index];
            drive_file(&task_batch, file, &task_token).await;
        });
        if let Err(e) = handle.await {
            let file = &batch.files()[index];
            tracing::error!(batch_id = %batch.id(), file_id = %file.id(), error = %e, "file worker failed");
            settle(batch, file, FileStatus::Error(worker_lost())).await;
        }
    }
}
