//! Retry and backoff for failed file attempts.
//!
//! Transient network failures (timeouts, resets, throttling, 5xx) are retried
//! with exponential backoff up to `max_attempts`; throttling starts one step
//! later. Anything else fails the file on the first occurrence.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{DownloadError, NetworkErrorKind};

/// How a failed attempt is treated by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Timeouts, dropped connections and 5xx other than 503.
    Transient,
    /// 429 and 503; backs off one step further than `Transient`.
    Throttled,
    Permanent,
}

impl RetryClass {
    pub fn of(e: &DownloadError) -> Self {
        let DownloadError::Network(ne) = e else {
            return RetryClass::Permanent;
        };
        match ne.kind {
            NetworkErrorKind::Timeout | NetworkErrorKind::ConnectionLost => RetryClass::Transient,
            NetworkErrorKind::Throttled => match ne.status {
                Some(code @ 500..=599) if code != 503 => RetryClass::Transient,
                _ => RetryClass::Throttled,
            },
            NetworkErrorKind::PermanentResource | NetworkErrorKind::UnsupportedAddress => {
                RetryClass::Permanent
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Exponential backoff with caps, built from `[retry]` in the config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per file including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(cfg.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`: base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// `attempt` is 1-based and counts the attempt that just failed.
    pub fn decide(&self, attempt: u32, error: &DownloadError) -> RetryDecision {
        let step = match RetryClass::of(error) {
            RetryClass::Permanent => return RetryDecision::NoRetry,
            RetryClass::Transient => attempt,
            RetryClass::Throttled => attempt + 1,
        };
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.backoff(step))
    }
}
