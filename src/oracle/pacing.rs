use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Minimum spacing between consecutive calls to one external service.
///
/// The clock is marked after every call, failed ones included, so pacing
/// holds across retries.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: None,
        }
    }

    /// Sleep until `min_interval` has passed since the last call.
    pub async fn wait(&self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
    }

    pub fn mark(&mut self) {
        self.last_call = Some(Instant::now());
    }

    pub fn last_call(&self) -> Option<Instant> {
        self.last_call
    }
}

/// Attempt budget and backoff for transient oracle failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per call, the first one included.
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// delay = base_delay_ms * 2^(failure - 1)
    pub fn delay_for_failure(&self, failure: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(failure.saturating_sub(1)))
    }
}
