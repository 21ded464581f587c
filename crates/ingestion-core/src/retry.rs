use std::future::Future;
use std::time::Duration;

use crate::errors::ConnectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    None,
    Equal,
    Full,
}

/// §4.4 policy parameters. Defaults match the spec's stated defaults.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter: Jitter::Full,
        }
    }
}

impl RetryPolicy {
    /// Backoff for `attempt` (1-indexed), before jitter.
    fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_backoff.as_millis() as f64 * exp).min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    fn jittered_delay(&self, attempt: u32, rand_unit: f64) -> Duration {
        let base = self.base_delay(attempt);
        match self.jitter {
            Jitter::None => base,
            Jitter::Equal => {
                let half = base.as_millis() as f64 / 2.0;
                Duration::from_millis((half + half * rand_unit) as u64)
            }
            Jitter::Full => Duration::from_millis((base.as_millis() as f64 * rand_unit) as u64),
        }
    }
}

/// Default retry/fail classification (§4.4): retry on network, rate-limit and
/// server errors; fail fast on validation and (non-5xx) auth errors.
pub fn default_classify(err: &ConnectorError) -> bool {
    err.is_retryable()
}

/// Runs `operation` under `policy`, retrying per `classify` and sleeping between
/// attempts (honoring `RateLimitError::retry_after_secs` when present).
///
/// `rand_unit` supplies a `[0, 1)` random value per attempt for jitter — callers
/// inject it so the retrier itself stays free of a `rand` dependency and
/// deterministic in tests.
pub struct Retrier {
    policy: RetryPolicy,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub async fn run<T, F, Fut>(
        &self,
        trace_id: &str,
        mut rand_unit: impl FnMut() -> f64,
        mut operation: F,
    ) -> Result<T, ConnectorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ConnectorError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let should_retry = default_classify(&err) && attempt < self.policy.max_attempts;
                    if !should_retry {
                        return Err(err);
                    }

                    let delay = match err.retry_after_secs() {
                        Some(secs) => Duration::from_secs(secs),
                        None => self.policy.jittered_delay(attempt, rand_unit()),
                    };

                    tracing::warn!(
                        trace_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient error"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_up_to_max_attempts_then_fails() {
        let retrier = Retrier::new(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            multiplier: 2.0,
            jitter: Jitter::None,
        });
        let calls = AtomicU32::new(0);

        let result: Result<(), ConnectorError> = retrier
            .run("trace-1", || 0.5, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::Network("boom".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_fail_without_retry() {
        let retrier = Retrier::new(RetryPolicy::default());
        let calls = AtomicU32::new(0);

        let result: Result<(), ConnectorError> = retrier
            .run("trace-1", || 0.0, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::Validation("bad".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retry_after_overrides_backoff() {
        let retrier = Retrier::new(RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        });
        let calls = AtomicU32::new(0);

        let started = tokio::time::Instant::now();
        let _: Result<(), ConnectorError> = retrier
            .run("trace-1", || 0.0, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ConnectorError::RateLimit {
                            retry_after_secs: Some(5),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(tokio::time::Instant::now().saturating_duration_since(started) >= Duration::from_secs(5));
    }
}
