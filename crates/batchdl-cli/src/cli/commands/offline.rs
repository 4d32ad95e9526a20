//! Status edits applied straight to the database when no `batchdl run` is active.

use anyhow::{bail, Result};
use batchdl_core::model::{aggregate, BatchId, BatchStatus, FileStatus};
use batchdl_core::persistence::DownloadsPersistence;

/// Move every file matching `from` to `to` and rewrite the batch row.
pub(crate) async fn set_file_status(
    store: &dyn DownloadsPersistence,
    id: &BatchId,
    from: fn(&FileStatus) -> bool,
    to: FileStatus,
) -> Result<(BatchStatus, usize)> {
    let Some(mut stored) = store.load_batch(id).await? else {
        bail!("batch {id} not found");
    };
    let mut changed = 0;
    for file in stored.files.iter_mut().filter(|f| from(&f.status)) {
        file.status = to.clone();
        store.update_file(file).await?;
        changed += 1;
    }
    let agg = aggregate(&stored.files);
    let status = BatchStatus {
        state: agg.state,
        bytes_downloaded: agg.bytes_downloaded,
        bytes_total: agg.bytes_total,
        error: agg.error,
        ..stored.status
    };
    store.update_batch(&status).await?;
    Ok((status, changed))
}
