//! Fixed-interval throttle.

use std::time::Duration;
use tokio::time::Instant;

use super::CallbackThrottle;
use crate::model::BatchStatus;

/// At most one progress event per `min_interval`.
///
/// Uses tokio's clock so paused-time tests can step it.
pub struct TimeThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl TimeThrottle {
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            last_emit: None,
            min_interval,
        }
    }

    /// Check against an explicit instant.
    pub fn should_emit_at(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

impl CallbackThrottle for TimeThrottle {
    fn should_emit(&mut self, _status: &BatchStatus) -> bool {
        self.should_emit_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_emit_passes() {
        let mut throttle = TimeThrottle::new(Duration::from_secs(1));
        assert!(throttle.should_emit_at(Instant::now()));
    }

    #[test]
    fn at_most_one_per_interval() {
        let mut throttle = TimeThrottle::new(Duration::from_secs(1));
        let t0 = Instant::now();
        let emitted = (0..50)
            .map(|i| t0 + Duration::from_millis(i * 100))
            .filter(|&t| throttle.should_emit_at(t))
            .count();
        // 0.0s .. 4.9s at 100ms steps: emits at 0,1,2,3,4
        assert_eq!(emitted, 5);
    }
}
