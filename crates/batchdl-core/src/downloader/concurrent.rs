//! Up to `max_parallel` files in flight at once.
//!
//! Keeps the task set full; when one file settles the next queued file starts.
//! A failing file never cancels its siblings. Requirement rules are checked
//! again before every spawn after the first.

use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{drive_file, rules_hold};
use crate::batch::DownloadBatch;

pub(super) async fn run(
    batch: &Arc<DownloadBatch>,
    pending: Vec<usize>,
    token: &CancellationToken,
    max_parallel: usize,
) {
    let max_parallel = max_parallel.max(1);
    let mut queue = pending.into_iter().peekable();
    let mut join_set = JoinSet::new();
    let mut started = 0usize;

    loop {
        while join_set.len() < max_parallel && !token.is_cancelled() {
            if queue.peek().is_none() || (started > 0 && !rules_hold(batch).await) {
                break;
            }
            let Some(index) = queue.next() else {
                break;
            };
            started += 1;
            let task_batch = Arc::clone(batch);
            let task_token = token.clone();
            join_set.spawn(async move {
                let file = &task_batch.files()[index];
                drive_file(&task_batch, file, &task_token).await;
            });
        }

        if join_set.is_empty() {
            break;
        }

        // A worker that panicked leaves its file DOWNLOADING; the leftover sweep settles it.
        if let Some(Err(e)) = join_set.join_next().await {
            tracing::error!(batch_id = %batch.id(), error = %e, "file worker failed");
        }
    }
}
