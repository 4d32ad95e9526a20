//! Collaborators shared by every batch of a manager.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::connection::ConnectionChecker;
use crate::downloader::FilesDownloader;
use crate::event::DownloadEvent;
use crate::network::FileFetcher;
use crate::persistence::DownloadsPersistence;
use crate::requirement::RequirementRules;
use crate::retry::RetryPolicy;
use crate::storage::FileStorage;
use crate::throttle::ThrottlePolicy;

pub(crate) struct EngineContext {
    pub fetcher: Arc<dyn FileFetcher>,
    pub storage: Arc<dyn FileStorage>,
    pub persistence: Arc<dyn DownloadsPersistence>,
    pub connection: Arc<ConnectionChecker>,
    pub rules: RequirementRules,
    pub retry: RetryPolicy,
    /// Minimum spacing of progress writes per file.
    pub persist_interval: Duration,
    pub downloader: FilesDownloader,
    pub throttle: ThrottlePolicy,
    pub events: mpsc::UnboundedSender<DownloadEvent>,
}

impl EngineContext {
    pub fn emit(&self, event: DownloadEvent) {
        // The dispatcher is gone only after shutdown.
        let _ = self.events.send(event);
    }
}
