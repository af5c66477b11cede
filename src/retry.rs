//! Bounded retry with back-off

use std::future::Future;
use std::time::Duration;

use crate::Result;

/// How often and how patiently to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retries: u32,
    /// Delay before the first retry
    pub delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub factor: u32,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(retries: u32, delay: Duration, factor: u32) -> Self {
        Self {
            retries,
            delay,
            factor,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scale = self
            .factor
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.delay.saturating_mul(scale)
    }
}

/// Run `op` until it succeeds, fails with an error `should_retry` rejects,
/// or runs out of retries. The last error is returned.
pub async fn retry<T, F, Fut, P>(policy: RetryPolicy, should_retry: P, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&crate::Error) -> bool,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries && should_retry(&e) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::info!(
                    "retrying after {} (attempt {}/{}, in {:?})",
                    e,
                    attempt,
                    policy.retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
