use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{NetworkError, NetworkErrorKind};
use crate::model::FileSize;
use crate::network::{ByteStream, FetchResponse, FileFetcher};

#[derive(Default)]
struct Resource {
    body: Arc<Vec<u8>>,
    /// Returned by the next fetches, one per fetch.
    fetch_failures: VecDeque<NetworkError>,
    /// One-shot failure once a stream has delivered this many bytes.
    fail_at: Option<(u64, NetworkError)>,
    /// Streams block once they reach this offset, until `release`.
    hold_at: Option<u64>,
    ignore_ranges: bool,
    hide_size: bool,
    fetches: usize,
}

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    bytes_served: AtomicU64,
}

/// In-memory `FileFetcher` serving fixed bodies in chunks, with scripted
/// failures and a hold point for pausing a transfer mid-body.
pub struct SimulatedFetcher {
    resources: Mutex<HashMap<String, Resource>>,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
    counters: Arc<Counters>,
    released: watch::Sender<bool>,
    waiting: Arc<watch::Sender<usize>>,
}

impl Default for SimulatedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedFetcher {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
            chunk_size: 100,
            chunk_delay: None,
            counters: Arc::new(Counters::default()),
            released: watch::channel(true).0,
            waiting: Arc::new(watch::channel(0).0),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sleep (tokio time) before every chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    fn with_resource<R>(&self, address: &str, f: impl FnOnce(&mut Resource) -> R) -> R {
        let mut guard = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.entry(address.to_string()).or_default())
    }

    pub fn add(&self, address: &str, body: Vec<u8>) {
        self.with_resource(address, |r| r.body = Arc::new(body));
    }

    pub fn fail_next_fetch(&self, address: &str, error: NetworkError) {
        self.with_resource(address, |r| r.fetch_failures.push_back(error));
    }

    pub fn fail_at(&self, address: &str, offset: u64, error: NetworkError) {
        self.with_resource(address, |r| r.fail_at = Some((offset, error)));
    }

    pub fn hold_at(&self, address: &str, offset: u64) {
        self.released.send_replace(false);
        self.with_resource(address, |r| r.hold_at = Some(offset));
    }

    /// Let held streams continue and clear every hold point.
    pub fn release(&self) {
        let mut guard = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        for r in guard.values_mut() {
            r.hold_at = None;
        }
        drop(guard);
        self.released.send_replace(true);
    }

    /// Resolves once at least one stream is blocked at its hold point.
    pub async fn wait_held(&self) {
        let mut rx = self.waiting.subscribe();
        let _ = rx.wait_for(|n| *n > 0).await;
    }

    pub fn ignore_ranges(&self, address: &str) {
        self.with_resource(address, |r| r.ignore_ranges = true);
    }

    /// Probe and responses report no size.
    pub fn hide_size(&self, address: &str) {
        self.with_resource(address, |r| r.hide_size = true);
    }

    pub fn fetch_count(&self, address: &str) -> usize {
        self.with_resource(address, |r| r.fetches)
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn bytes_served(&self) -> u64 {
        self.counters.bytes_served.load(Ordering::SeqCst)
    }
}

fn not_found(address: &str) -> NetworkError {
    NetworkError {
        kind: NetworkErrorKind::PermanentResource,
        status: Some(404),
        message: format!("no resource at {address}"),
    }
}

#[async_trait]
impl FileFetcher for SimulatedFetcher {
    async fn probe_size(&self, address: &str) -> Result<FileSize, NetworkError> {
        let guard = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        let r = guard.get(address).ok_or_else(|| not_found(address))?;
        Ok(if r.hide_size {
            FileSize::Unknown
        } else {
            FileSize::Known(r.body.len() as u64)
        })
    }

    async fn fetch(&self, address: &str, offset: Option<u64>) -> Result<FetchResponse, NetworkError> {
        let mut guard = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        let r = guard.get_mut(address).ok_or_else(|| not_found(address))?;
        r.fetches += 1;
        if let Some(err) = r.fetch_failures.pop_front() {
            return Err(err);
        }
        let len = r.body.len() as u64;
        let start = match offset {
            Some(o) if !r.ignore_ranges => o.min(len),
            _ => 0,
        };
        let stream = SimStream {
            body: Arc::clone(&r.body),
            pos: start,
            chunk_size: self.chunk_size as u64,
            chunk_delay: self.chunk_delay,
            fail_at: r.fail_at.take(),
            hold_at: r.hold_at,
            released: self.released.subscribe(),
            waiting: Arc::clone(&self.waiting),
            counters: Arc::clone(&self.counters),
        };
        let total_size = (!r.hide_size).then_some(len);
        drop(guard);

        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Ok(FetchResponse {
            start_offset: start,
            total_size,
            stream: Box::new(stream),
        })
    }
}

struct SimStream {
    body: Arc<Vec<u8>>,
    pos: u64,
    chunk_size: u64,
    chunk_delay: Option<Duration>,
    fail_at: Option<(u64, NetworkError)>,
    hold_at: Option<u64>,
    released: watch::Receiver<bool>,
    waiting: Arc<watch::Sender<usize>>,
    counters: Arc<Counters>,
}

/// Counts a stream as waiting at its hold point; also on drop by cancellation.
struct Waiting<'a>(&'a watch::Sender<usize>);

impl<'a> Waiting<'a> {
    fn enter(tx: &'a watch::Sender<usize>) -> Self {
        tx.send_modify(|n| *n += 1);
        Self(tx)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Drop for SimStream {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ByteStream for SimStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, NetworkError> {
        if let Some(hold) = self.hold_at {
            if self.pos >= hold {
                let _waiting = Waiting::enter(&self.waiting);
                let _ = self.released.wait_for(|released| *released).await;
                self.hold_at = None;
            }
        }
        if let Some((at, _)) = &self.fail_at {
            if self.pos >= *at {
                if let Some((_, err)) = self.fail_at.take() {
                    return Err(err);
                }
            }
        }
        let len = self.body.len() as u64;
        if self.pos >= len {
            return Ok(None);
        }
        match self.chunk_delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        let mut end = (self.pos + self.chunk_size).min(len);
        if let Some(hold) = self.hold_at.filter(|h| *h > self.pos) {
            end = end.min(hold);
        }
        if let Some((at, _)) = self.fail_at.as_ref().filter(|(at, _)| *at > self.pos) {
            end = end.min(*at);
        }
        let chunk = self.body[self.pos as usize..end as usize].to_vec();
        self.pos = end;
        self.counters
            .bytes_served
            .fetch_add(chunk.len() as u64, Ordering::SeqCst);
        Ok(Some(chunk))
    }
}
