use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound for a single retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Retry behaviour derived from the job policy settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt.
    pub max_retries: u32,
    /// Base of the exponential back-off, in seconds.
    pub backoff_seed: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_seed: u32) -> Self {
        Self {
            max_retries,
            backoff_seed,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Formula: delay = min(seed^attempt seconds, [`MAX_BACKOFF`])
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let secs = u64::from(self.backoff_seed)
            .checked_pow(attempt)
            .unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(MAX_BACKOFF)
    }

    /// Whether a job that has failed `failures` times may run again.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures <= self.max_retries && failures > 0
    }
}
