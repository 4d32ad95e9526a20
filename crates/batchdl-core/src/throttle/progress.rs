//! Percentage-increase throttle.

use super::CallbackThrottle;
use crate::model::BatchStatus;

/// Emits whenever the whole-number percentage rises above the last emitted one.
///
/// While the total size is unresolved there is no percentage, so every update passes.
#[derive(Debug, Default)]
pub struct ProgressIncreaseThrottle {
    last_percentage: Option<u8>,
}

impl ProgressIncreaseThrottle {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CallbackThrottle for ProgressIncreaseThrottle {
    fn should_emit(&mut self, status: &BatchStatus) -> bool {
        let Some(pct) = status.percentage() else {
            return true;
        };
        match self.last_percentage {
            Some(last) if pct <= last => false,
            _ => {
                self.last_percentage = Some(pct);
                true
            }
        }
    }
}
