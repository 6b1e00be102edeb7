//! In-process, per-client request rate limiting.
//!
//! Each `(store_name, client_id)` pair owns an independent trailing
//! window of request timestamps; a request is admitted while fewer than
//! `max_requests` timestamps fall inside the window. State is purely
//! process-local -- this bounds what one process sends outbound, it is
//! not a distributed quota.
//!
//! Buckets are pruned opportunistically on access and fully-expired
//! buckets are evicted once the map grows, so memory stays bounded
//! under many distinct clients.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::errors::RateLimitError;
use crate::metrics::{RATE_LIMIT_BUCKETS, RATE_LIMIT_DENIALS_TOTAL};

/// Admission parameters for one limited surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests admitted per window. Must be positive.
    pub max_requests: u32,
    /// Trailing window length. Must be non-zero.
    pub window: Duration,
}

/// Profile for the internal contact/API endpoint: 5 requests per
/// minute per caller identity.
pub const INTERNAL_API_LIMIT: RateLimitConfig = RateLimitConfig {
    max_requests: 5,
    window: Duration::from_millis(60_000),
};

/// Profile for the third-party metadata service: 10 requests per
/// second, shared across the process under [`GLOBAL_CLIENT_ID`].
pub const METADATA_SERVICE_LIMIT: RateLimitConfig = RateLimitConfig {
    max_requests: 10,
    window: Duration::from_millis(1_000),
};

/// Fixed context id for globally-scoped limits.
pub const GLOBAL_CLIENT_ID: &str = "global";

/// Floor for the adaptive recheck delay, so second-scale windows stay
/// responsive.
const MIN_POLL: Duration = Duration::from_millis(25);

/// Bucket-map size beyond which fully-expired buckets are swept.
const BUCKET_SWEEP_THRESHOLD: usize = 256;

#[derive(Debug)]
struct Bucket {
    /// Admission timestamps inside the current window, oldest first.
    stamps: Vec<Instant>,
    /// Window the bucket was last used with; governs sweep eligibility.
    window: Duration,
}

/// Windowed request limiter keyed by `(store_name, client_id)`.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<(String, String), Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether one more request is admitted for the key right now.
    ///
    /// Admission records a timestamp; denial has no side effects on the
    /// bucket. Fails loud on nonsensical config.
    pub fn is_allowed(
        &self,
        store_name: &str,
        client_id: &str,
        config: &RateLimitConfig,
    ) -> Result<bool, RateLimitError> {
        validate(config)?;
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("bucket map poisoned");

        if buckets.len() > BUCKET_SWEEP_THRESHOLD {
            Self::sweep(&mut buckets, now);
        }

        let bucket = buckets
            .entry((store_name.to_string(), client_id.to_string()))
            .or_insert_with(|| Bucket {
                stamps: Vec::new(),
                window: config.window,
            });
        bucket.window = config.window;
        bucket
            .stamps
            .retain(|stamp| now.duration_since(*stamp) < config.window);

        if (bucket.stamps.len() as u32) < config.max_requests {
            bucket.stamps.push(now);
            Ok(true)
        } else {
            debug!(
                "rate limit hit for ({store_name}, {client_id}): {} in {:?}",
                bucket.stamps.len(),
                config.window
            );
            metrics::counter!(RATE_LIMIT_DENIALS_TOTAL, "store" => store_name.to_string())
                .increment(1);
            Ok(false)
        }
    }

    /// Resolve once [`is_allowed`](Self::is_allowed) admits the key.
    ///
    /// Without an explicit `poll_interval` the recheck delay adapts to
    /// the window: it waits until roughly when the oldest counted
    /// request ages out, clamped to a small floor, instead of
    /// busy-polling minute-scale windows. Concurrent waiters on one key
    /// are each rechecked independently; no fairness order is
    /// guaranteed beyond first-slot-first-served.
    pub async fn wait_for_permit(
        &self,
        store_name: &str,
        client_id: &str,
        config: &RateLimitConfig,
        poll_interval: Option<Duration>,
    ) -> Result<(), RateLimitError> {
        loop {
            if self.is_allowed(store_name, client_id, config)? {
                return Ok(());
            }
            let delay = poll_interval
                .unwrap_or_else(|| self.next_slot_delay(store_name, client_id, config));
            tokio::time::sleep(delay).await;
        }
    }

    /// Time until the oldest counted request leaves the window.
    fn next_slot_delay(
        &self,
        store_name: &str,
        client_id: &str,
        config: &RateLimitConfig,
    ) -> Duration {
        let buckets = self.buckets.lock().expect("bucket map poisoned");
        let oldest = buckets
            .get(&(store_name.to_string(), client_id.to_string()))
            .and_then(|bucket| bucket.stamps.first().copied());
        match oldest {
            Some(stamp) => (stamp + config.window)
                .saturating_duration_since(Instant::now())
                .max(MIN_POLL),
            None => MIN_POLL,
        }
    }

    /// Drop buckets whose every timestamp has aged out.
    fn sweep(buckets: &mut HashMap<(String, String), Bucket>, now: Instant) {
        buckets.retain(|_, bucket| {
            bucket
                .stamps
                .iter()
                .any(|stamp| now.duration_since(*stamp) < bucket.window)
        });
        metrics::gauge!(RATE_LIMIT_BUCKETS).set(buckets.len() as f64);
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.lock().expect("bucket map poisoned").len()
    }
}

fn validate(config: &RateLimitConfig) -> Result<(), RateLimitError> {
    if config.max_requests == 0 {
        return Err(RateLimitError::InvalidConfig(
            "max_requests must be positive".to_string(),
        ));
    }
    if config.window.is_zero() {
        return Err(RateLimitError::InvalidConfig(
            "window must be non-zero".to_string(),
        ));
    }
    Ok(())
}

// -- Tests --------------------------------------------------------------------
