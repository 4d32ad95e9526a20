//! `batchdl delete <id>` – delete a batch, and its data unless `--keep-files`.

use anyhow::Result;
use batchdl_core::config::BatchdlConfig;
use batchdl_core::model::{BatchId, BatchState};
use batchdl_core::persistence::SqliteStore;
use batchdl_core::DownloadManagerBuilder;
use std::sync::Arc;

use crate::cli::control_socket;

pub async fn run_delete(
    store: Arc<SqliteStore>,
    cfg: &BatchdlConfig,
    id: &BatchId,
    remove_files: bool,
) -> Result<()> {
    let line = if remove_files {
        format!("delete {id}")
    } else {
        format!("delete {id} keep")
    };
    if control_socket::try_send(&line).await {
        println!("Asked running batchdl to delete {id}");
        return Ok(());
    }

    let manager = DownloadManagerBuilder::new(cfg.clone())
        .persistence(store)
        .resume_on_start(false)
        .build()
        .await?;
    let result = manager.delete(id, remove_files).await;
    manager.shutdown().await?;
    let status = result?;
    match status.state {
        BatchState::Deleted => println!("Deleted batch {id}"),
        _ => {
            let reason = status
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| status.state.as_str().to_string());
            println!("Batch {id} not fully deleted: {reason}");
        }
    }
    Ok(())
}
