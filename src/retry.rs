//! Consolidated retry policy with exponential backoff and jitter.
//!
//! Every read call site shares one [`RetryPolicy`] value so backoff
//! behavior is identical and testable in one place. Delays double per
//! attempt, cap at `max_delay`, and are randomized within a
//! `jitter_ratio` band to avoid synchronized retry storms across
//! processes.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::errors::BackendError;
use crate::metrics::STORE_READ_RETRIES_TOTAL;

/// Backoff parameters applied by [`retry_async`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Ceiling for the exponential growth.
    pub max_delay: Duration,
    /// Fractional randomization band, e.g. 0.2 for +/-20%.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after the given zero-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Shift capped so a pathological attempt count cannot overflow.
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_delay);
        let jitter = self.jitter_ratio.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return exp;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        Duration::from_secs_f64(exp.as_secs_f64() * factor)
    }
}

/// Run `op` until it succeeds, the error stops being retryable, or the
/// attempt budget is spent. The terminal error is returned unchanged so
/// callers can still distinguish not-found from real failures.
pub async fn retry_async<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < policy.max_attempts && err.is_retryable() => {
                let delay = policy.delay_for(attempt);
                debug!(
                    "{label}: attempt {} failed ({err}), retrying in {:?}",
                    attempt + 1,
                    delay
                );
                metrics::counter!(STORE_READ_RETRIES_TOTAL, "op" => label.to_string())
                    .increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// -- Tests --------------------------------------------------------------------
