//! Per-installation token bucket for provider API calls.
//!
//! The bucket refills at a rate derived from the provider's `x-ratelimit-*`
//! headers: after each response the remaining budget and reset time are
//! reconciled into the local refill state. Acquire waits rather than fails,
//! so callers never see a synthetic 429 from our own limiter.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

/// Default budget assumed until the first rate-limit headers arrive.
const DEFAULT_CAPACITY: f64 = 60.0;
const DEFAULT_REFILL_PER_SEC: f64 = 1.0;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill_ms: i64,
    /// Hard block until the provider's window resets (remaining == 0).
    blocked_until_ms: i64,
}

impl Bucket {
    fn new(now_ms: i64) -> Self {
        Self {
            tokens: DEFAULT_CAPACITY,
            capacity: DEFAULT_CAPACITY,
            refill_per_sec: DEFAULT_REFILL_PER_SEC,
            last_refill_ms: now_ms,
            blocked_until_ms: 0,
        }
    }

    fn refill(&mut self, now_ms: i64) {
        let elapsed_secs = ((now_ms - self.last_refill_ms).max(0)) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed_secs * self.refill_per_sec).min(self.capacity);
        self.last_refill_ms = now_ms;
    }

    /// Take one token; returns the wait before the next attempt when empty.
    fn try_take(&mut self, now_ms: i64) -> Option<Duration> {
        if now_ms < self.blocked_until_ms {
            return Some(Duration::from_millis(
                (self.blocked_until_ms - now_ms) as u64,
            ));
        }
        self.refill(now_ms);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return None;
        }
        let deficit = 1.0 - self.tokens;
        let wait_secs = deficit / self.refill_per_sec.max(0.01);
        Some(Duration::from_secs_f64(wait_secs.min(60.0)))
    }
}

/// Rate-limit headers observed on a provider response.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitSnapshot {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    /// Epoch seconds when the window resets.
    pub reset_epoch_secs: Option<u64>,
}

impl RateLimitSnapshot {
    /// Extract `x-ratelimit-*` headers from a response.
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
        };
        Self {
            limit: get("x-ratelimit-limit"),
            remaining: get("x-ratelimit-remaining"),
            reset_epoch_secs: get("x-ratelimit-reset"),
        }
    }
}

/// Token buckets keyed by installation id.
///
/// In a multi-instance deployment the authoritative budget lives with the
/// provider; each instance reconciles its local bucket from the headers it
/// observes, which converges without any cross-instance coordination.
#[derive(Debug, Default)]
pub struct InstallationLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InstallationLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire one call slot for an installation, waiting when exhausted.
    pub async fn acquire(&self, installation_id: &str) {
        loop {
            let wait = {
                let now_ms = chrono::Utc::now().timestamp_millis();
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(installation_id.to_string())
                    .or_insert_with(|| Bucket::new(now_ms));
                bucket.try_take(now_ms)
            };
            match wait {
                None => return,
                Some(delay) => {
                    debug!(
                        installation_id,
                        wait_ms = delay.as_millis() as u64,
                        "rate limiter: bucket empty, waiting"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Reconcile the local bucket from observed response headers.
    pub async fn observe(&self, installation_id: &str, snapshot: RateLimitSnapshot) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(installation_id.to_string())
            .or_insert_with(|| Bucket::new(now_ms));

        if let Some(limit) = snapshot.limit {
            bucket.capacity = limit.max(1) as f64;
        }
        if let Some(remaining) = snapshot.remaining {
            bucket.tokens = (remaining as f64).min(bucket.capacity);
        }
        if let (Some(remaining), Some(reset)) = (snapshot.remaining, snapshot.reset_epoch_secs) {
            if remaining == 0 {
                // Nothing left in this window: hold every caller until reset.
                bucket.blocked_until_ms = (reset as i64) * 1000;
            } else {
                bucket.blocked_until_ms = 0;
                let now_secs = now_ms / 1000;
                let window = (reset as i64 - now_secs).max(1) as f64;
                // Spread the remaining budget over the rest of the window.
                bucket.refill_per_sec = (remaining as f64 / window).clamp(0.05, bucket.capacity);
            }
        }
        bucket.last_refill_ms = now_ms;
    }
}
