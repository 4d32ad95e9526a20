//! Deterministic stand-ins for the ports, for tests (feature `test-utils`).
//!
//! Nothing here touches the network or the filesystem, so tests can run under
//! paused tokio time.

mod fetcher;
mod persistence;
mod storage;

pub use fetcher::SimulatedFetcher;
pub use persistence::FlakyPersistence;
pub use storage::MemoryFileStorage;

use std::sync::atomic::{AtomicU8, Ordering};

use crate::connection::{ConnectivityMonitor, NetworkType};

/// Connectivity switched by the test.
#[derive(Debug)]
pub struct ManualConnectivity {
    state: AtomicU8,
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(NetworkType::Unmetered)
    }
}

impl ManualConnectivity {
    pub fn new(initial: NetworkType) -> Self {
        Self {
            state: AtomicU8::new(encode(initial)),
        }
    }

    pub fn set(&self, network: NetworkType) {
        self.state.store(encode(network), Ordering::SeqCst);
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn current_type(&self) -> NetworkType {
        match self.state.load(Ordering::SeqCst) {
            0 => NetworkType::Unavailable,
            1 => NetworkType::Metered,
            _ => NetworkType::Unmetered,
        }
    }
}

fn encode(network: NetworkType) -> u8 {
    match network {
        NetworkType::Unavailable => 0,
        NetworkType::Metered => 1,
        NetworkType::Unmetered => 2,
    }
}

/// `len` bytes of a repeating, position-dependent pattern.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
