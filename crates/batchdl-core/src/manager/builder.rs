//! Assembles a `DownloadManager` from its collaborators and rehydrates
//! persisted batches.

use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use super::actor::Processor;
use super::registry::{Registry, Runs};
use super::subscribers::{spawn_dispatcher, Subscribers};
use super::DownloadManager;
use crate::batch::DownloadBatch;
use crate::config::BatchdlConfig;
use crate::connection::{AssumeOnline, ConnectionChecker, ConnectivityMonitor};
use crate::context::EngineContext;
use crate::downloader::FilesDownloader;
use crate::error::ManagerError;
use crate::model::{BatchState, FileStatus};
use crate::network::{CurlFetcher, CurlOptions, FileFetcher};
use crate::persistence::{DownloadsPersistence, MemoryStore};
use crate::requirement::{RequirementRule, RequirementRules, StorageSpaceRule};
use crate::retry::RetryPolicy;
use crate::storage::{FileStorage, LocalStorage};
use crate::throttle::ThrottlePolicy;

const COMMAND_QUEUE: usize = 64;

pub struct DownloadManagerBuilder {
    config: BatchdlConfig,
    persistence: Option<Arc<dyn DownloadsPersistence>>,
    fetcher: Option<Arc<dyn FileFetcher>>,
    storage: Option<Arc<dyn FileStorage>>,
    monitor: Option<Box<dyn ConnectivityMonitor>>,
    rules: RequirementRules,
    throttle: Option<ThrottlePolicy>,
    retry: Option<RetryPolicy>,
    resume_on_start: bool,
}

impl Default for DownloadManagerBuilder {
    fn default() -> Self {
        Self::new(BatchdlConfig::default())
    }
}

impl DownloadManagerBuilder {
    pub fn new(config: BatchdlConfig) -> Self {
        Self {
            config,
            persistence: None,
            fetcher: None,
            storage: None,
            monitor: None,
            rules: RequirementRules::new(),
            throttle: None,
            retry: None,
            resume_on_start: true,
        }
    }

    /// Defaults to an in-memory store.
    pub fn persistence(mut self, persistence: Arc<dyn DownloadsPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Defaults to `CurlFetcher`.
    pub fn fetcher(mut self, fetcher: Arc<dyn FileFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Defaults to `LocalStorage`.
    pub fn storage(mut self, storage: Arc<dyn FileStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Defaults to `AssumeOnline`.
    pub fn connectivity(mut self, monitor: impl ConnectivityMonitor + 'static) -> Self {
        self.monitor = Some(Box::new(monitor));
        self
    }

    pub fn rule(mut self, rule: impl RequirementRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    /// Overrides `callback_throttle` from the config.
    pub fn throttle(mut self, throttle: ThrottlePolicy) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Overrides `[retry]` from the config.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Whether rehydrated QUEUED batches start right away (default true).
    pub fn resume_on_start(mut self, resume: bool) -> Self {
        self.resume_on_start = resume;
        self
    }

    /// Start the actor and dispatcher tasks and rehydrate persisted batches.
    /// Must be called inside a tokio runtime.
    pub async fn build(self) -> Result<DownloadManager, ManagerError> {
        let cfg = self.config;
        let storage = self.storage.unwrap_or_else(|| Arc::new(LocalStorage::new()));
        let mut rules = RequirementRules::new();
        if let Some(reserve) = cfg.storage_reserve_bytes {
            rules.push(Arc::new(StorageSpaceRule::new(Arc::clone(&storage), reserve)));
        }
        for rule in self.rules.iter() {
            rules.push(Arc::clone(rule));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(EngineContext {
            fetcher: self
                .fetcher
                .unwrap_or_else(|| Arc::new(CurlFetcher::new(CurlOptions::default()))),
            storage,
            persistence: self
                .persistence
                .unwrap_or_else(|| Arc::new(MemoryStore::new())),
            connection: Arc::new(ConnectionChecker::new(
                self.monitor.unwrap_or_else(|| Box::new(AssumeOnline)),
                cfg.allowed_connection,
            )),
            rules,
            retry: self
                .retry
                .unwrap_or_else(|| cfg.retry.as_ref().map(RetryPolicy::from).unwrap_or_default()),
            persist_interval: cfg.persist_interval(),
            downloader: FilesDownloader::from_config(&cfg),
            throttle: self
                .throttle
                .unwrap_or_else(|| ThrottlePolicy::from(cfg.callback_throttle)),
            events: events_tx,
        });

        let subscribers = Arc::new(Subscribers::default());
        let (close_tx, close_rx) = oneshot::channel();
        let dispatcher = spawn_dispatcher(Arc::clone(&subscribers), events_rx, close_rx);

        let registry = Arc::new(Registry::default());
        let runs = Runs::new(cfg.max_parallel_batches);
        rehydrate(&ctx, &registry, &runs, self.resume_on_start).await?;

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let processor = Processor::new(commands_rx, Arc::clone(&registry), runs.clone(), Arc::clone(&ctx));
        let actor = tokio::spawn(processor.run());

        tracing::info!(
            downloader = ?ctx.downloader,
            max_parallel_batches = cfg.max_parallel_batches,
            "download manager started"
        );
        Ok(DownloadManager {
            commands: commands_tx,
            registry,
            runs,
            ctx,
            subscribers,
            tasks: Mutex::new(Some(super::Tasks {
                actor,
                dispatcher,
                close: close_tx,
            })),
        })
    }
}

/// Load every persisted batch: interrupted transfers go back to QUEUED,
/// unfinished deletes are finished with the data intent they were started
/// with, QUEUED batches are scheduled. PAUSED and ERROR batches stay as they
/// are.
///
/// A delete is unfinished when the batch row says DELETING, any file row says
/// DELETING, or the batch row has no file rows left.
async fn rehydrate(
    ctx: &Arc<EngineContext>,
    registry: &Registry,
    runs: &Runs,
    resume_on_start: bool,
) -> Result<(), ManagerError> {
    let stored = ctx.persistence.load_batches().await?;
    let count = stored.len();
    for stored in stored {
        let unfinished_delete = stored.status.state == BatchState::Deleting
            || stored.files.is_empty()
            || stored
                .files
                .iter()
                .any(|f| matches!(f.status, FileStatus::Deleting));
        let remove_files = stored.remove_files;
        let batch = Arc::new(DownloadBatch::new(stored.status, stored.files, Arc::clone(ctx)));
        batch.reset_interrupted().await;

        if unfinished_delete {
            match batch.delete(remove_files).await {
                Ok(status) if status.state == BatchState::Deleted => continue,
                Ok(status) => {
                    tracing::warn!(batch_id = %batch.id(), state = status.state.as_str(), "interrupted delete still incomplete");
                }
                Err(e) => {
                    tracing::warn!(batch_id = %batch.id(), error = %e, "could not resume interrupted delete");
                }
            }
        }
        let queued = batch
            .files()
            .iter()
            .any(|f| matches!(f.status(), FileStatus::Queued));
        registry.insert(Arc::clone(&batch));
        if resume_on_start && queued {
            runs.spawn(batch);
        }
    }
    if count > 0 {
        tracing::info!(batches = count, "rehydrated persisted batches");
    }
    Ok(())
}
