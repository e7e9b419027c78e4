//! Exponential backoff for remote API calls.

use crate::types::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry schedule: `base_delay * 2^attempt` plus up to one second of jitter,
/// capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add uniform `[0, 1s)` jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let mut delay = self.base_delay.saturating_mul(factor);
        if self.jitter {
            let jitter_ms = rand::thread_rng().gen_range(0..1000);
            delay = delay.saturating_add(Duration::from_millis(jitter_ms));
        }
        delay.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-recoverable error, or
    /// the attempt budget is spent.
    ///
    /// # Arguments
    ///
    /// * `label` - Operation name for logs
    /// * `op` - Factory producing one attempt
    ///
    /// # Errors
    ///
    /// Returns the last error seen
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_recoverable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    if err.is_rate_limit() {
                        tracing::warn!(
                            operation = label,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Rate limit hit, backing off"
                        );
                    } else {
                        tracing::warn!(
                            operation = label,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transient failure, retrying"
                        );
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        operation = label,
                        attempts = attempt + 1,
                        error = %err,
                        "Giving up"
                    );
                    return Err(err);
                }
            }
        }
    }
}
