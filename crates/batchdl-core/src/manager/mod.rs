//! `DownloadManager`: the public entry point.
//!
//! Mutations (submit, pause, resume, delete, ...) are commands to a single
//! actor task and are applied in the order they were sent. Status queries read
//! the registry directly. Events are delivered to subscribers from a
//! dedicated dispatcher task, never from a download worker.

mod actor;
mod builder;
mod registry;
mod subscribers;

pub use builder::DownloadManagerBuilder;
pub use subscribers::{Callback, Subscription};

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use actor::Command;
use registry::{Registry, Runs};
use subscribers::Subscribers;

use crate::connection::AllowedConnection;
use crate::context::EngineContext;
use crate::error::ManagerError;
use crate::event::DownloadEvent;
use crate::model::{BatchId, BatchRequest, BatchState, BatchStatus, FileRecord};

struct Tasks {
    actor: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
    close: oneshot::Sender<()>,
}

pub struct DownloadManager {
    commands: mpsc::Sender<Command>,
    registry: Arc<Registry>,
    runs: Runs,
    ctx: Arc<EngineContext>,
    subscribers: Arc<Subscribers>,
    tasks: Mutex<Option<Tasks>>,
}

impl DownloadManager {
    pub fn builder() -> DownloadManagerBuilder {
        DownloadManagerBuilder::default()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, ManagerError>>) -> Command,
    ) -> Result<T, ManagerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| ManagerError::Stopped)?;
        rx.await.map_err(|_| ManagerError::Stopped)?
    }

    /// Validate, persist and schedule a batch. Returns once the batch is
    /// durably recorded. Resubmitting a resident id returns it unchanged.
    pub async fn submit(&self, request: BatchRequest) -> Result<BatchId, ManagerError> {
        self.request(|reply| Command::Submit { request, reply }).await
    }

    /// Stop in-flight transfers; unfinished files end PAUSED.
    pub async fn pause(&self, id: &BatchId) -> Result<BatchStatus, ManagerError> {
        let id = id.clone();
        self.request(|reply| Command::Pause { id, reply }).await
    }

    /// Re-queue PAUSED files and schedule the batch.
    pub async fn resume(&self, id: &BatchId) -> Result<BatchStatus, ManagerError> {
        let id = id.clone();
        self.request(|reply| Command::Resume { id, reply }).await
    }

    /// Resume every paused batch; returns how many were scheduled.
    pub async fn resume_all(&self) -> Result<usize, ManagerError> {
        self.request(|reply| Command::ResumeAll { reply }).await
    }

    /// Delete a batch, and its data when `remove_files`. The returned status is
    /// DELETED, or ERROR naming the files that could not be removed.
    pub async fn delete(&self, id: &BatchId, remove_files: bool) -> Result<BatchStatus, ManagerError> {
        let id = id.clone();
        self.request(|reply| Command::Delete {
            id,
            remove_files,
            reply,
        })
        .await
    }

    pub async fn mark_notification_seen(&self, id: &BatchId) -> Result<(), ManagerError> {
        let id = id.clone();
        self.request(|reply| Command::MarkSeen { id, reply }).await
    }

    /// Tell the manager the network changed. Batches paused because the
    /// connection was lost resume when it is allowed again.
    pub async fn connectivity_changed(&self) -> Result<usize, ManagerError> {
        self.request(|reply| Command::ConnectivityChanged { reply })
            .await
    }

    /// Takes effect at the next connection check of every transfer.
    pub fn update_allowed_connection(&self, allowed: AllowedConnection) {
        tracing::info!(?allowed, "allowed connection changed");
        self.ctx.connection.update_allowed_connection(allowed);
    }

    pub fn status(&self, id: &BatchId) -> Result<BatchStatus, ManagerError> {
        self.registry
            .get(id)
            .map(|b| b.status())
            .ok_or_else(|| ManagerError::NotFound(id.clone()))
    }

    /// Every live batch, oldest first.
    pub fn statuses(&self) -> Vec<BatchStatus> {
        self.registry.all().iter().map(|b| b.status()).collect()
    }

    pub fn statuses_by_status(&self, state: BatchState) -> Vec<BatchStatus> {
        self.statuses()
            .into_iter()
            .filter(|s| s.state == state)
            .collect()
    }

    pub fn file_statuses(&self, id: &BatchId) -> Result<Vec<FileRecord>, ManagerError> {
        self.registry
            .get(id)
            .map(|b| b.file_statuses())
            .ok_or_else(|| ManagerError::NotFound(id.clone()))
    }

    /// Register a callback for every event. It runs on the dispatcher task.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DownloadEvent) + Send + Sync + 'static,
    {
        self.subscribers.add(Arc::new(callback))
    }

    /// Events as a channel, for async consumers.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.subscribe(move |ev: &DownloadEvent| {
            let _ = tx.send(ev.clone());
        });
        (sub, rx)
    }

    /// Resolves once every command sent so far was handled and no batch run is
    /// scheduled or in flight.
    pub async fn wait_until_idle(&self) -> Result<(), ManagerError> {
        self.request(|reply| Command::Barrier { reply }).await?;
        self.runs.idle().await;
        Ok(())
    }

    /// Stop every batch (unfinished files stay QUEUED for the next start),
    /// wait for runs to unwind and deliver pending events. Later calls
    /// return `ManagerError::Stopped`.
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(tasks) = tasks else {
            return Err(ManagerError::Stopped);
        };
        let result = self.request(|reply| Command::Shutdown { reply }).await;
        self.runs.idle().await;
        let _ = tasks.actor.await;
        let _ = tasks.close.send(());
        let _ = tasks.dispatcher.await;
        result
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("downloader", &self.ctx.downloader)
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}
