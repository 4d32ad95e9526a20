//! `batchdl status` – show status of all batches.

use anyhow::Result;
use batchdl_core::persistence::{DownloadsPersistence, StoredBatch};
use batchdl_core::{BatchState, BatchStatus, FileSize};

pub async fn run_status(
    store: &dyn DownloadsPersistence,
    show_files: bool,
    state: Option<BatchState>,
) -> Result<()> {
    let batches = select(store, state, show_files).await?;
    if batches.is_empty() {
        match state {
            Some(state) => println!("No {} batches.", state.as_str()),
            None => println!("No batches in database."),
        }
        return Ok(());
    }
    println!("{:<38} {:<12} {:<18} TITLE", "ID", "STATE", "PROGRESS");
    for b in batches {
        println!(
            "{:<38} {:<12} {:<18} {}",
            b.status.id,
            b.status.state.as_str(),
            progress(&b.status),
            b.status.title
        );
        if let Some(err) = &b.status.error {
            println!("  error: {err}");
        }
        if show_files {
            for f in &b.files {
                let size = match f.size {
                    FileSize::Known(n) => n.to_string(),
                    FileSize::Unknown => "-".to_string(),
                };
                println!(
                    "  {:<12} {:>12}/{:<12} {}",
                    f.status.as_str(),
                    f.bytes_downloaded,
                    size,
                    f.path.display()
                );
            }
        }
    }
    Ok(())
}

/// Every batch, or only those stored in `state`. With a filter, files are
/// loaded only when they will be listed.
pub(crate) async fn select(
    store: &dyn DownloadsPersistence,
    state: Option<BatchState>,
    with_files: bool,
) -> Result<Vec<StoredBatch>> {
    let Some(state) = state else {
        return Ok(store.load_batches().await?);
    };
    let mut out = Vec::new();
    for status in store.query_by_status(state).await? {
        if with_files {
            if let Some(stored) = store.load_batch(&status.id).await? {
                out.push(stored);
            }
        } else {
            out.push(StoredBatch {
                status,
                files: Vec::new(),
                remove_files: false,
            });
        }
    }
    Ok(out)
}

pub(crate) fn progress(status: &BatchStatus) -> String {
    match status.percentage() {
        Some(pct) => format!("{pct}% ({} B)", status.bytes_downloaded),
        None => format!("{} B", status.bytes_downloaded),
    }
}
