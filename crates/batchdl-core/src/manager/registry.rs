//! Live batches by id, and the run scheduler.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{watch, Semaphore};
use tracing::Instrument;

use crate::batch::{DownloadBatch, RunOutcome};
use crate::model::{BatchId, BatchStatus};

/// Readable from any thread; only the actor task inserts or removes.
#[derive(Default)]
pub(crate) struct Registry {
    batches: RwLock<HashMap<BatchId, Arc<DownloadBatch>>>,
}

impl Registry {
    pub fn get(&self, id: &BatchId) -> Option<Arc<DownloadBatch>> {
        self.batches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &BatchId) -> bool {
        self.batches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn insert(&self, batch: Arc<DownloadBatch>) {
        self.batches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(batch.id().clone(), batch);
    }

    pub fn remove(&self, id: &BatchId) -> Option<Arc<DownloadBatch>> {
        self.batches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Every live batch, oldest first.
    pub fn all(&self) -> Vec<Arc<DownloadBatch>> {
        let guard = self.batches.read().unwrap_or_else(PoisonError::into_inner);
        let mut batches: Vec<(BatchStatus, Arc<DownloadBatch>)> =
            guard.values().map(|b| (b.status(), Arc::clone(b))).collect();
        drop(guard);
        batches.sort_by(|(a, _), (b, _)| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        batches.into_iter().map(|(_, b)| b).collect()
    }
}

/// Spawns batch runs, at most `max_parallel_batches` at once, and counts the
/// runs that have been scheduled but not yet returned.
#[derive(Clone)]
pub(crate) struct Runs {
    permits: Arc<Semaphore>,
    active: Arc<watch::Sender<usize>>,
}

/// Decrements the active count when a run task ends, panicked or not.
struct ActiveGuard(Arc<watch::Sender<usize>>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Runs {
    pub fn new(max_parallel_batches: usize) -> Self {
        let (active, _) = watch::channel(0usize);
        Self {
            permits: Arc::new(Semaphore::new(max_parallel_batches.max(1))),
            active: Arc::new(active),
        }
    }

    pub fn spawn(&self, batch: Arc<DownloadBatch>) {
        self.active.send_modify(|n| *n += 1);
        let guard = ActiveGuard(Arc::clone(&self.active));
        let permits = Arc::clone(&self.permits);
        let span = tracing::info_span!("batch", batch_id = %batch.id());
        tokio::spawn(
            async move {
                let _guard = guard;
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                match batch.download().await {
                    RunOutcome::Blocked(reason) => tracing::debug!(%reason, "run blocked"),
                    RunOutcome::Idle => tracing::trace!("nothing to run"),
                    outcome => tracing::debug!(?outcome, "run returned"),
                }
            }
            .instrument(span),
        );
    }

    /// Resolves once no run is scheduled or in flight.
    pub async fn idle(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}
