#![allow(dead_code)]

pub mod range_server;

use std::sync::Arc;
use std::time::Duration;

use batchdl_core::config::BatchdlConfig;
use batchdl_core::persistence::{DownloadsPersistence, MemoryStore};
use batchdl_core::retry::RetryPolicy;
use batchdl_core::testing::{ManualConnectivity, MemoryFileStorage, SimulatedFetcher};
use batchdl_core::{DownloadManager, DownloadManagerBuilder};

/// Simulated ports shared between a test and its manager.
pub struct Harness {
    pub fetcher: Arc<SimulatedFetcher>,
    pub storage: Arc<MemoryFileStorage>,
    pub store: Arc<dyn DownloadsPersistence>,
    pub net: Arc<ManualConnectivity>,
}

impl Harness {
    pub fn new(fetcher: SimulatedFetcher) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            storage: Arc::new(MemoryFileStorage::new()),
            store: Arc::new(MemoryStore::new()),
            net: Arc::new(ManualConnectivity::default()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DownloadsPersistence>) -> Self {
        self.store = store;
        self
    }

    pub fn builder(&self, cfg: BatchdlConfig) -> DownloadManagerBuilder {
        DownloadManagerBuilder::new(cfg)
            .fetcher(Arc::clone(&self.fetcher) as _)
            .storage(Arc::clone(&self.storage) as _)
            .persistence(Arc::clone(&self.store))
            .connectivity(Arc::clone(&self.net))
            .retry(fast_retry(3))
    }

    pub async fn manager(&self, cfg: BatchdlConfig) -> DownloadManager {
        self.builder(cfg).build().await.expect("manager builds")
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
    }
}
