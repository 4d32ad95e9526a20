//! Control socket: server (during `batchdl run`) and client (for pause/resume/delete).
//! Protocol: one line per command: "pause <id>", "resume <id>", "delete <id> [keep]".

use anyhow::Result;
use batchdl_core::config;
use batchdl_core::{BatchId, DownloadManager};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Pause(BatchId),
    Resume(BatchId),
    Delete { id: BatchId, remove_files: bool },
}

/// Parse one protocol line. Malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<ControlCommand> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?;
    let id = BatchId::from(parts.next()?);
    let rest = parts.next();
    if parts.next().is_some() {
        return None;
    }
    match (verb, rest) {
        ("pause", None) => Some(ControlCommand::Pause(id)),
        ("resume", None) => Some(ControlCommand::Resume(id)),
        ("delete", None) => Some(ControlCommand::Delete {
            id,
            remove_files: true,
        }),
        ("delete", Some("keep")) => Some(ControlCommand::Delete {
            id,
            remove_files: false,
        }),
        _ => None,
    }
}

/// Batches paused through the socket. `batchdl run` keeps listening while any
/// of them is waiting for a `resume` or `delete`.
#[derive(Debug, Default)]
pub struct HeldBatches {
    ids: Mutex<HashSet<BatchId>>,
    changed: Notify,
}

impl HeldBatches {
    fn ids(&self) -> std::sync::MutexGuard<'_, HashSet<BatchId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hold(&self, id: BatchId) {
        self.ids().insert(id);
    }

    pub fn release(&self, id: &BatchId) {
        self.ids().remove(id);
        self.changed.notify_one();
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }

    /// Resolves after the next `release`, including one that already happened
    /// since the last call.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}

async fn apply(manager: &DownloadManager, held: &HeldBatches, command: ControlCommand) {
    let result = match &command {
        ControlCommand::Pause(id) => manager.pause(id).await.map(|_| held.hold(id.clone())),
        ControlCommand::Resume(id) => manager.resume(id).await.map(|_| held.release(id)),
        ControlCommand::Delete { id, remove_files } => manager
            .delete(id, *remove_files)
            .await
            .map(|_| held.release(id)),
    };
    match result {
        Ok(()) => tracing::info!(?command, "control command applied"),
        Err(e) => tracing::warn!(?command, error = %e, "control command failed"),
    }
}

/// Spawns a task that listens on `path` and applies each command line to `manager`.
pub fn spawn_control_listener(
    manager: Arc<DownloadManager>,
    held: Arc<HeldBatches>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let manager = Arc::clone(&manager);
                    let held = Arc::clone(&held);
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(stream).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            match parse_line(&line) {
                                Some(command) => apply(&manager, &held, command).await,
                                None => tracing::debug!(%line, "ignoring malformed control line"),
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends `line` to the socket at `socket_path`. No-op if the path does not exist.
pub async fn send_line(socket_path: &Path, line: &str) -> Result<bool> {
    if !socket_path.exists() {
        return Ok(false);
    }
    let mut stream = UnixStream::connect(socket_path).await?;
    stream.write_all(format!("{line}\n").as_bytes()).await?;
    Ok(true)
}

/// Send to the default socket. False when no `batchdl run` is listening.
pub async fn try_send(line: &str) -> bool {
    let Ok(path) = config::control_socket_path() else {
        return false;
    };
    match send_line(&path, line).await {
        Ok(sent) => sent,
        Err(e) => {
            tracing::debug!(path = %path.display(), "control socket unreachable: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(
            parse_line("pause b1"),
            Some(ControlCommand::Pause(BatchId::from("b1")))
        );
        assert_eq!(
            parse_line("  resume  b1 \n"),
            Some(ControlCommand::Resume(BatchId::from("b1")))
        );
        assert_eq!(
            parse_line("delete b1 keep"),
            Some(ControlCommand::Delete {
                id: BatchId::from("b1"),
                remove_files: false
            })
        );
        assert_eq!(
            parse_line("delete b1"),
            Some(ControlCommand::Delete {
                id: BatchId::from("b1"),
                remove_files: true
            })
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("pause"), None);
        assert_eq!(parse_line("cancel b1"), None);
        assert_eq!(parse_line("pause b1 now"), None);
        assert_eq!(parse_line("delete b1 keep extra"), None);
    }

    #[tokio::test]
    async fn held_batches_wake_the_waiter_on_release() {
        let held = Arc::new(HeldBatches::default());
        held.hold(BatchId::from("b1"));
        held.hold(BatchId::from("b2"));
        assert!(!held.is_empty());

        let waiter = {
            let held = Arc::clone(&held);
            tokio::spawn(async move { held.changed().await })
        };
        held.release(&BatchId::from("b1"));
        waiter.await.unwrap();
        assert!(!held.is_empty());

        // A release with nobody waiting is remembered for the next wait.
        held.release(&BatchId::from("b2"));
        held.changed().await;
        assert!(held.is_empty());
    }

    #[tokio::test]
    async fn send_line_without_socket_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let sent = send_line(&dir.path().join("none.sock"), "pause b1").await.unwrap();
        assert!(!sent);
    }
}
