//! `batchdl resume <id>` – re-queue a paused batch.

use anyhow::Result;
use batchdl_core::model::{BatchId, FileStatus};
use batchdl_core::persistence::DownloadsPersistence;

use super::offline;
use crate::cli::control_socket;

pub async fn run_resume(store: &dyn DownloadsPersistence, id: &BatchId) -> Result<()> {
    if control_socket::try_send(&format!("resume {id}")).await {
        println!("Asked running batchdl to resume {id}");
        return Ok(());
    }
    let (_, changed) = offline::set_file_status(
        store,
        id,
        |s| matches!(s, FileStatus::Paused),
        FileStatus::Queued,
    )
    .await?;
    println!("Resumed batch {id}: {changed} file(s) queued for the next `batchdl run`");
    Ok(())
}
