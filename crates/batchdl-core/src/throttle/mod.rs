//! Rate limiting of batch status notifications.
//!
//! A `CallbackThrottle` only ever sees progress updates. `EventGate` sits in
//! front of it: state changes (including a new error or status reason) and the
//! final snapshot of a run pass straight through, and a snapshot identical to
//! the last delivered one is dropped.

mod progress;
mod time;

pub use progress::ProgressIncreaseThrottle;
pub use time::TimeThrottle;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ThrottleConfig;
use crate::model::BatchStatus;

/// Decides whether a progress update is delivered.
pub trait CallbackThrottle: Send {
    fn should_emit(&mut self, status: &BatchStatus) -> bool;
}

/// Builds a fresh throttle for each batch.
pub type ThrottleFactory = Arc<dyn Fn() -> Box<dyn CallbackThrottle> + Send + Sync>;

/// Throttle policy selected for a manager.
#[derive(Clone)]
pub enum ThrottlePolicy {
    Time(Duration),
    ProgressIncrease,
    Custom(ThrottleFactory),
}

impl ThrottlePolicy {
    pub fn custom<F, T>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: CallbackThrottle + 'static,
    {
        ThrottlePolicy::Custom(Arc::new(move || Box::new(f()) as Box<dyn CallbackThrottle>))
    }

    pub fn build(&self) -> Box<dyn CallbackThrottle> {
        match self {
            ThrottlePolicy::Time(interval) => Box::new(TimeThrottle::new(*interval)),
            ThrottlePolicy::ProgressIncrease => Box::new(ProgressIncreaseThrottle::new()),
            ThrottlePolicy::Custom(factory) => factory(),
        }
    }
}

impl fmt::Debug for ThrottlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThrottlePolicy::Time(d) => f.debug_tuple("Time").field(d).finish(),
            ThrottlePolicy::ProgressIncrease => f.write_str("ProgressIncrease"),
            ThrottlePolicy::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl From<ThrottleConfig> for ThrottlePolicy {
    fn from(cfg: ThrottleConfig) -> Self {
        match cfg {
            ThrottleConfig::Time { interval_ms } => {
                ThrottlePolicy::Time(Duration::from_millis(interval_ms))
            }
            ThrottleConfig::Progress => ThrottlePolicy::ProgressIncrease,
        }
    }
}

/// Per-batch filter in front of the throttle.
pub struct EventGate {
    throttle: Box<dyn CallbackThrottle>,
    last: Option<BatchStatus>,
}

impl EventGate {
    pub fn new(throttle: Box<dyn CallbackThrottle>) -> Self {
        Self {
            throttle,
            last: None,
        }
    }

    /// True when `status` should be delivered; remembers it as the last delivered snapshot.
    pub fn admit(&mut self, status: &BatchStatus) -> bool {
        let pass = match &self.last {
            Some(last) if last == status => false,
            Some(last) if !progress_only(last, status) => true,
            None => true,
            _ => self.throttle.should_emit(status),
        };
        if pass {
            self.last = Some(status.clone());
        }
        pass
    }

    /// Like `admit` but bypasses the throttle: used for the last snapshot of a run.
    pub fn admit_final(&mut self, status: &BatchStatus) -> bool {
        if self.last.as_ref() == Some(status) {
            return false;
        }
        self.last = Some(status.clone());
        true
    }
}

/// True when two snapshots differ in byte counts alone.
fn progress_only(a: &BatchStatus, b: &BatchStatus) -> bool {
    a.state == b.state
        && a.error == b.error
        && a.reason == b.reason
        && a.notification_seen == b.notification_seen
}
