//! Bounded retry with exponential backoff.

use std::time::Duration;

use tracing::{debug, warn};

use super::{VisionClient, VisionRequest, VlmError};

/// Retry budget and pacing for VLM calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt
    pub base_delay: Duration,
    /// Pause after every successful call
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            rate_limit_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay after failed attempt `attempt` (0-based): `base * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

/// Call `client` until it succeeds, the error is not retryable, or the retry
/// budget is spent.
///
/// After a success the caller's worker sleeps `rate_limit_delay` before
/// returning.
pub async fn call_with_retry(
    client: &dyn VisionClient,
    request: &VisionRequest,
    policy: &RetryPolicy,
) -> Result<String, VlmError> {
    let mut attempt = 0;
    loop {
        match client.complete(request).await {
            Ok(text) => {
                if !policy.rate_limit_delay.is_zero() {
                    tokio::time::sleep(policy.rate_limit_delay).await;
                }
                return Ok(text);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "VLM call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(attempts = attempt + 1, error = %e, "VLM call giving up");
                return Err(VlmError::Exhausted {
                    attempts: attempt + 1,
                    last: Box::new(e),
                });
            }
        }
    }
}
