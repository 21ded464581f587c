use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Per-source token bucket: `capacity` = configured burst, refill rate =
/// configured `requestsPerSecond` (§4.3).
struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    /// Drained by `penalize` after a 429 with `Retry-After`, so the next
    /// `acquire` waits at least that long regardless of token count.
    blocked_until: Option<Instant>,
}

impl Bucket {
    fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec,
            last_refill: Instant::now(),
            blocked_until: None,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Returns how long the caller must sleep before a token is available.
    fn try_take(&mut self) -> Duration {
        self.refill();

        if let Some(until) = self.blocked_until
            && until > Instant::now()
        {
            return until.saturating_duration_since(Instant::now());
        }
        self.blocked_until = None;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Duration::ZERO;
        }

        let deficit = 1.0 - self.tokens;
        let wait_secs = if self.refill_per_sec > 0.0 {
            deficit / self.refill_per_sec
        } else {
            f64::MAX
        };
        Duration::from_secs_f64(wait_secs)
    }

    fn penalize(&mut self, retry_after: Duration) {
        self.tokens = 0.0;
        let until = Instant::now() + retry_after;
        self.blocked_until = Some(match self.blocked_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }
}

/// Suspends callers until a request slot is available for a given source key.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    default_capacity: u32,
    default_rate_per_sec: f64,
}

impl RateLimiter {
    pub fn new(default_capacity: u32, default_rate_per_sec: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            default_capacity,
            default_rate_per_sec,
        }
    }

    /// Suspends the caller until a slot opens for `source_key` (§4.3 contract).
    pub async fn acquire(&self, source_key: &str) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets.entry(source_key.to_string()).or_insert_with(|| {
                    Bucket::new(self.default_capacity, self.default_rate_per_sec)
                });
                bucket.try_take()
            };
            if wait.is_zero() {
                return;
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Drains `source_key`'s bucket after a `RateLimitError` carrying
    /// `retryAfter`, preventing a stampede on the next acquire (§4.3).
    pub async fn penalize(&self, source_key: &str, retry_after: Duration) {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(source_key.to_string())
            .or_insert_with(|| Bucket::new(self.default_capacity, self.default_rate_per_sec));
        bucket.penalize(retry_after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn acquire_drains_bucket_then_waits_for_refill() {
        let limiter = RateLimiter::new(1, 1.0);
        limiter.acquire("src").await;

        let started = Instant::now();
        limiter.acquire("src").await;
        assert!(Instant::now().saturating_duration_since(started) >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn penalize_forces_a_minimum_wait_even_with_tokens_available() {
        let limiter = RateLimiter::new(5, 10.0);
        limiter.penalize("src", Duration::from_secs(3)).await;

        let started = Instant::now();
        limiter.acquire("src").await;
        assert!(Instant::now().saturating_duration_since(started) >= Duration::from_secs(2));
    }
}
