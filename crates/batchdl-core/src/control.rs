//! Cooperative cancellation for a batch run.
//!
//! Pausing, deleting or losing connectivity cancels the batch's token with a
//! reason; transfers observe it between chunks and unwind to PAUSED. A cancelled
//! token stays cancelled until the batch is explicitly resumed, so a stop that
//! races a starting run is never lost. The reason tells the manager whether the
//! batch should come back on its own once connectivity returns.

use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Why a run was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Explicit `pause`.
    User,
    /// Connectivity dropped below the allowed type.
    ConnectionLost,
    /// A requirement rule stopped holding between files.
    Requirement,
    /// The batch is being deleted.
    Delete,
    /// Manager shutdown.
    Shutdown,
}

impl StopReason {
    fn weight(self) -> u8 {
        match self {
            StopReason::ConnectionLost | StopReason::Requirement => 0,
            StopReason::User => 1,
            StopReason::Shutdown => 2,
            StopReason::Delete => 3,
        }
    }
}

struct Inner {
    token: CancellationToken,
    reason: Option<StopReason>,
}

/// Stop handle shared between a batch and the workers driving its files.
pub struct TransferControl {
    inner: Mutex<Inner>,
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferControl {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                token: CancellationToken::new(),
                reason: None,
            }),
        }
    }

    /// Replace a cancelled token with a fresh one and clear the stop reason.
    pub fn rearm(&self) -> CancellationToken {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.token = CancellationToken::new();
        inner.reason = None;
        inner.token.clone()
    }

    /// Token runs observe.
    pub fn token(&self) -> CancellationToken {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .clone()
    }

    /// Cancel the current run. A user pause outranks a connectivity or
    /// requirement stop, and shutdown and delete outrank all of them.
    pub fn stop(&self, reason: StopReason) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.reason.map_or(true, |r| reason.weight() >= r.weight()) {
            inner.reason = Some(reason);
        }
        inner.token.cancel();
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reason
    }

    pub fn is_stopped(&self) -> bool {
        self.token().is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_pause_outranks_connectivity_stop() {
        let control = TransferControl::new();
        let token = control.token();
        control.stop(StopReason::ConnectionLost);
        control.stop(StopReason::User);
        assert!(token.is_cancelled());
        assert_eq!(control.reason(), Some(StopReason::User));
        control.stop(StopReason::ConnectionLost);
        assert_eq!(control.reason(), Some(StopReason::User));
        control.stop(StopReason::Delete);
        assert_eq!(control.reason(), Some(StopReason::Delete));
    }

    #[test]
    fn requirement_stop_ranks_with_connectivity() {
        let control = TransferControl::new();
        control.stop(StopReason::Requirement);
        control.stop(StopReason::ConnectionLost);
        assert_eq!(control.reason(), Some(StopReason::ConnectionLost));
        control.stop(StopReason::Shutdown);
        control.stop(StopReason::Requirement);
        assert_eq!(control.reason(), Some(StopReason::Shutdown));
    }

    #[test]
    fn rearm_resets_token_and_reason() {
        let control = TransferControl::new();
        let old = control.token();
        control.stop(StopReason::User);
        assert!(control.token().is_cancelled());
        let fresh = control.rearm();
        assert!(old.is_cancelled());
        assert!(!fresh.is_cancelled());
        assert_eq!(control.reason(), None);
        assert!(!control.is_stopped());
    }
}
