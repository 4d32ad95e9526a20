//! The actor task: every mutating manager operation runs here, one at a time.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::registry::{Registry, Runs};
use crate::batch::DownloadBatch;
use crate::context::EngineContext;
use crate::control::StopReason;
use crate::error::ManagerError;
use crate::model::{unix_millis, BatchId, BatchRequest, BatchState, BatchStatus};

type Reply<T> = oneshot::Sender<Result<T, ManagerError>>;

pub(crate) enum Command {
    Submit {
        request: BatchRequest,
        reply: Reply<BatchId>,
    },
    Pause {
        id: BatchId,
        reply: Reply<BatchStatus>,
    },
    Resume {
        id: BatchId,
        reply: Reply<BatchStatus>,
    },
    ResumeAll {
        reply: Reply<usize>,
    },
    Delete {
        id: BatchId,
        remove_files: bool,
        reply: Reply<BatchStatus>,
    },
    MarkSeen {
        id: BatchId,
        reply: Reply<()>,
    },
    ConnectivityChanged {
        reply: Reply<usize>,
    },
    /// Answered once every command sent before it has been handled.
    Barrier {
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

pub(crate) struct Processor {
    commands: mpsc::Receiver<Command>,
    registry: Arc<Registry>,
    runs: Runs,
    ctx: Arc<EngineContext>,
}

impl Processor {
    pub fn new(
        commands: mpsc::Receiver<Command>,
        registry: Arc<Registry>,
        runs: Runs,
        ctx: Arc<EngineContext>,
    ) -> Self {
        Self {
            commands,
            registry,
            runs,
            ctx,
        }
    }

    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Submit { request, reply } => {
                    let _ = reply.send(self.submit(request).await);
                }
                Command::Pause { id, reply } => {
                    let result = match self.find(&id) {
                        Ok(batch) => Ok(batch.pause().await),
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(result);
                }
                Command::Resume { id, reply } => {
                    let _ = reply.send(self.resume(&id).await);
                }
                Command::ResumeAll { reply } => {
                    let mut resumed = 0;
                    for batch in self.registry.all() {
                        if batch.resume().await {
                            self.runs.spawn(batch);
                            resumed += 1;
                        }
                    }
                    let _ = reply.send(Ok(resumed));
                }
                Command::Delete {
                    id,
                    remove_files,
                    reply,
                } => {
                    let _ = reply.send(self.delete(&id, remove_files).await);
                }
                Command::MarkSeen { id, reply } => {
                    let result = match self.find(&id) {
                        Ok(batch) => batch.mark_notification_seen().await.map_err(ManagerError::from),
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(result);
                }
                Command::ConnectivityChanged { reply } => {
                    let _ = reply.send(Ok(self.connectivity_changed().await));
                }
                Command::Barrier { reply } => {
                    let _ = reply.send(Ok(()));
                }
                Command::Shutdown { reply } => {
                    self.shutdown().await;
                    let _ = reply.send(Ok(()));
                    break;
                }
            }
        }
        tracing::debug!("manager actor stopped");
    }

    fn find(&self, id: &BatchId) -> Result<Arc<DownloadBatch>, ManagerError> {
        self.registry
            .get(id)
            .ok_or_else(|| ManagerError::NotFound(id.clone()))
    }

    /// Validate, persist, register, schedule. A resident id is acknowledged
    /// without touching the live batch.
    async fn submit(&self, request: BatchRequest) -> Result<BatchId, ManagerError> {
        if let Some(id) = &request.batch_id {
            if self.registry.contains(id) {
                tracing::info!(batch_id = %id, "batch already resident, submission merged");
                return Ok(id.clone());
            }
        }
        request.validate().map_err(ManagerError::InvalidRequest)?;

        let (status, files) = request.into_records(unix_millis());
        self.ctx.persistence.persist_batch(&status, &files).await?;

        let id = status.id.clone();
        let batch = Arc::new(DownloadBatch::new(status, files, Arc::clone(&self.ctx)));
        tracing::info!(batch_id = %id, files = batch.files().len(), "batch submitted");
        self.registry.insert(Arc::clone(&batch));
        batch.publish();
        self.runs.spawn(batch);
        Ok(id)
    }

    async fn resume(&self, id: &BatchId) -> Result<BatchStatus, ManagerError> {
        let batch = self.find(id)?;
        // A batch kept QUEUED by a failed requirement is re-evaluated too.
        if batch.resume().await || batch.status().state == BatchState::Queued {
            self.runs.spawn(Arc::clone(&batch));
        }
        Ok(batch.status())
    }

    async fn delete(&self, id: &BatchId, remove_files: bool) -> Result<BatchStatus, ManagerError> {
        let batch = self.find(id)?;
        let status = batch.delete(remove_files).await?;
        if status.state == BatchState::Deleted {
            self.registry.remove(id);
        }
        Ok(status)
    }

    /// Resume batches stopped for connectivity or a requirement and retry the
    /// ones kept queued.
    /// Does nothing while the connection is still not allowed.
    async fn connectivity_changed(&self) -> usize {
        if !self.ctx.connection.is_allowed() {
            return 0;
        }
        let mut scheduled = 0;
        for batch in self.registry.all() {
            let wake = match batch.control().reason() {
                Some(StopReason::ConnectionLost | StopReason::Requirement) => batch.resume().await,
                Some(_) => false,
                None => batch.status().state == BatchState::Queued,
            };
            if wake {
                self.runs.spawn(batch);
                scheduled += 1;
            }
        }
        tracing::info!(scheduled, "connectivity restored");
        scheduled
    }

    async fn shutdown(&mut self) {
        self.commands.close();
        for batch in self.registry.all() {
            batch.shutdown().await;
        }
        // Commands queued behind shutdown are dropped; their callers see `Stopped`.
        while self.commands.try_recv().is_ok() {}
        tracing::info!("manager shut down");
    }
}
