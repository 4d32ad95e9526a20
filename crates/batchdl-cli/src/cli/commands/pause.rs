//! `batchdl pause <id>` – pause a batch. If `batchdl run` is active, it pauses the live batch.

use anyhow::Result;
use batchdl_core::model::{BatchId, FileStatus};
use batchdl_core::persistence::DownloadsPersistence;

use super::offline;
use crate::cli::control_socket;

pub async fn run_pause(store: &dyn DownloadsPersistence, id: &BatchId) -> Result<()> {
    if control_socket::try_send(&format!("pause {id}")).await {
        println!("Asked running batchdl to pause {id}");
        return Ok(());
    }
    let (status, changed) = offline::set_file_status(
        store,
        id,
        |s| matches!(s, FileStatus::Queued | FileStatus::Downloading),
        FileStatus::Paused,
    )
    .await?;
    println!("Paused batch {id}: {changed} file(s), now {}", status.state.as_str());
    Ok(())
}
