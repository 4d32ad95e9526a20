//! Connectivity classification against the allowed connection type.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

/// What the host platform reports about the current network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Unavailable,
    Metered,
    Unmetered,
}

/// Connection types a download may run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowedConnection {
    /// Any available network.
    #[default]
    Any,
    /// Only unmetered networks (e.g. Wi-Fi).
    Unmetered,
}

impl AllowedConnection {
    pub fn permits(self, network: NetworkType) -> bool {
        match (self, network) {
            (_, NetworkType::Unavailable) => false,
            (AllowedConnection::Any, _) => true,
            (AllowedConnection::Unmetered, NetworkType::Unmetered) => true,
            (AllowedConnection::Unmetered, NetworkType::Metered) => false,
        }
    }
}

/// Source of the current network type, supplied by the host.
pub trait ConnectivityMonitor: Send + Sync {
    fn current_type(&self) -> NetworkType;
}

impl<T: ConnectivityMonitor + ?Sized> ConnectivityMonitor for std::sync::Arc<T> {
    fn current_type(&self) -> NetworkType {
        (**self).current_type()
    }
}

/// Monitor for hosts without a platform signal: always reports unmetered.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeOnline;

impl ConnectivityMonitor for AssumeOnline {
    fn current_type(&self) -> NetworkType {
        NetworkType::Unmetered
    }
}

/// Gate used before a batch starts and between chunks of a transfer.
pub struct ConnectionChecker {
    monitor: Box<dyn ConnectivityMonitor>,
    allowed: RwLock<AllowedConnection>,
}

impl ConnectionChecker {
    pub fn new(monitor: Box<dyn ConnectivityMonitor>, allowed: AllowedConnection) -> Self {
        Self {
            monitor,
            allowed: RwLock::new(allowed),
        }
    }

    pub fn allowed(&self) -> AllowedConnection {
        *self.allowed.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_allowed_connection(&self, allowed: AllowedConnection) {
        *self.allowed.write().unwrap_or_else(PoisonError::into_inner) = allowed;
    }

    pub fn current_type(&self) -> NetworkType {
        self.monitor.current_type()
    }

    /// Ok when the current network satisfies the allowed type, else the reason.
    pub fn check(&self) -> Result<(), String> {
        let network = self.current_type();
        let allowed = self.allowed();
        if allowed.permits(network) {
            return Ok(());
        }
        Err(match network {
            NetworkType::Unavailable => "no network connection".to_string(),
            _ => format!("connection is {network:?}, allowed: {allowed:?}").to_lowercase(),
        })
    }

    pub fn is_allowed(&self) -> bool {
        self.check().is_ok()
    }
}
