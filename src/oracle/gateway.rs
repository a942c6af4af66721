use std::time::Duration;

use tracing::{debug, warn};

use super::client::Oracle;
use super::pacing::{RateLimiter, RetryPolicy};
use super::types::OracleRequest;
use crate::error::FatalError;

/// Paced, retrying front for an [`Oracle`].
///
/// Every call waits out the pacing interval first. Transient failures are
/// retried up to `retry.max_attempts`; quota and authorization failures are
/// returned at once.
pub struct OracleClient<O: Oracle> {
    oracle: O,
    limiter: RateLimiter,
    retry: RetryPolicy,
    calls: u64,
}

impl<O: Oracle> OracleClient<O> {
    pub fn new(oracle: O, limiter: RateLimiter, retry: RetryPolicy) -> Self {
        Self {
            oracle,
            limiter,
            retry,
            calls: 0,
        }
    }

    pub async fn call(&mut self, model: &str, request: &OracleRequest) -> Result<String, FatalError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.limiter.wait().await;
            let result = self.oracle.complete(model, request).await;
            self.limiter.mark();
            self.calls += 1;

            let err = match result {
                Ok(text) => {
                    debug!(model, attempt, chars = text.len(), "oracle answered");
                    return Ok(text);
                }
                Err(err) if err.is_fatal() => return Err(FatalError::from_fatal_oracle(err)),
                Err(err) => err,
            };

            if attempt >= max_attempts {
                return Err(FatalError::OracleUnavailable {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let delay_ms = err
                .retry_after_ms()
                .unwrap_or_else(|| self.retry.delay_for_failure(attempt));
            warn!(model, attempt, delay_ms, error = %err, "transient oracle failure, retrying");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    /// Number of requests issued so far, retries included.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }
}
