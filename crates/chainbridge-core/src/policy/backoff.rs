//! Capped linear reconnect backoff.

use std::time::Duration;

/// Delay before redial attempt `n` (1-based) is `min(n * step, max)`.
///
/// With the defaults this yields `2s, 4s, 6s, 8s, 10s, 10s, ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    pub step: Duration,
    pub max: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(2),
            max: Duration::from_secs(10),
        }
    }
}

impl ReconnectBackoff {
    pub fn new(step: Duration, max: Duration) -> Self {
        Self { step, max }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt.max(1)).min(self.max)
    }
}
