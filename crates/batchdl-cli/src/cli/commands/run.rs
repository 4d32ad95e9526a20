//! `batchdl run` – download every queued batch, then exit.
//!
//! A batch paused through the control socket keeps the command running, so a
//! later `batchdl resume` or `batchdl delete` can still reach it.

use anyhow::Result;
use batchdl_core::config::{self, BatchdlConfig};
use batchdl_core::persistence::SqliteStore;
use batchdl_core::{BatchState, DownloadEvent, DownloadManagerBuilder};
use std::sync::Arc;

use super::status::progress;
use crate::cli::control_socket;

pub async fn run_manager(store: Arc<SqliteStore>, cfg: &BatchdlConfig) -> Result<()> {
    let manager = Arc::new(
        DownloadManagerBuilder::new(cfg.clone())
            .persistence(store)
            .build()
            .await?,
    );
    let _progress = manager.subscribe(print_event);

    let held = Arc::new(control_socket::HeldBatches::default());
    let socket_path = config::control_socket_path().ok();
    let listener = socket_path.as_ref().and_then(|path| {
        match control_socket::spawn_control_listener(Arc::clone(&manager), Arc::clone(&held), path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket: {:#}", e);
                None
            }
        }
    });

    loop {
        manager.wait_until_idle().await?;
        if listener.is_none() || held.is_empty() {
            break;
        }
        println!("waiting: batch(es) paused, use `batchdl resume <id>` or `batchdl delete <id>`");
        held.changed().await;
    }

    if let Some(handle) = listener {
        handle.abort();
    }
    if let Some(path) = &socket_path {
        let _ = std::fs::remove_file(path);
    }
    manager.shutdown().await?;

    let statuses = manager.statuses();
    let done = statuses
        .iter()
        .filter(|s| s.state == BatchState::Downloaded)
        .count();
    println!("{done} of {} batch(es) downloaded", statuses.len());
    for s in statuses.iter().filter(|s| s.state == BatchState::Error) {
        let reason = s.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
        println!("  {} failed: {reason}", s.id);
    }
    Ok(())
}

fn print_event(event: &DownloadEvent) {
    match event {
        DownloadEvent::Batch(status) => {
            let mut line = format!(
                "{} {:<11} {}",
                status.id,
                status.state.as_str(),
                progress(status)
            );
            if let Some(reason) = &status.reason {
                line.push_str(&format!("  (waiting: {reason})"));
            }
            println!("{line}");
        }
        DownloadEvent::PersistenceFailed { batch_id, message } => {
            eprintln!("{batch_id}: could not save progress: {message}");
        }
    }
}
