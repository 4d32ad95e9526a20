//! Subscriber callbacks and the dispatcher task that calls them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::DownloadEvent;

pub type Callback = Arc<dyn Fn(&DownloadEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback)>>,
}

impl Subscribers {
    pub fn add(self: &Arc<Self>, callback: Callback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, callback));
        Subscription {
            id,
            subscribers: Arc::downgrade(self),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Callback)>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|(i, _)| *i != id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Call every subscriber outside the lock. A panicking callback is logged
    /// and does not affect the others.
    fn deliver(&self, event: &DownloadEvent) {
        let callbacks: Vec<Callback> = self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::error!(batch_id = %event.batch_id(), "subscriber callback panicked");
            }
        }
    }
}

/// Handle returned by `subscribe`; the callback is detached when it is dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Runs until every event sender is gone, which happens once the manager and
/// all of its batches have been dropped, or until `close` is signalled.
pub(crate) fn spawn_dispatcher(
    subscribers: Arc<Subscribers>,
    mut events: mpsc::UnboundedReceiver<DownloadEvent>,
    mut close: tokio::sync::oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                ev = events.recv() => match ev {
                    Some(ev) => subscribers.deliver(&ev),
                    None => return,
                },
                _ = &mut close => break,
            }
        }
        // Flush what was queued before close.
        while let Ok(ev) = events.try_recv() {
            subscribers.deliver(&ev);
        }
        tracing::debug!("event dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BatchId;
    use std::sync::atomic::AtomicUsize;

    fn event() -> DownloadEvent {
        DownloadEvent::PersistenceFailed {
            batch_id: BatchId::from("b"),
            message: "disk".to_string(),
        }
    }

    #[test]
    fn dropping_subscription_detaches_callback() {
        let subscribers = Arc::new(Subscribers::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let sub = subscribers.add(Arc::new(move |_: &DownloadEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        subscribers.deliver(&event());
        drop(sub);
        subscribers.deliver(&event());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(subscribers.len(), 0);
    }

    #[test]
    fn panicking_callback_does_not_starve_others() {
        let subscribers = Arc::new(Subscribers::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let _bad = subscribers.add(Arc::new(|_: &DownloadEvent| panic!("boom")));
        let _good = subscribers.add(Arc::new(move |_: &DownloadEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        subscribers.deliver(&event());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatcher_flushes_on_close() {
        let subscribers = Arc::new(Subscribers::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let _sub = subscribers.add(Arc::new(move |_: &DownloadEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = tokio::sync::oneshot::channel();
        tx.send(event()).unwrap();
        tx.send(event()).unwrap();
        close_tx.send(()).unwrap();
        spawn_dispatcher(Arc::clone(&subscribers), rx, close_rx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
