//! Retry with exponential backoff for page fetches.
//!
//! Wraps any [`Fetcher`] so that transient failures (timeouts, connection
//! errors, 5xx, 429) are retried locally and never reach the pipeline
//! unless the attempt budget runs out. A `Retry-After` hint on a 429
//! stretches the next wait.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use hackaplan_core::retry::{RetryPolicy, RetryingFetcher};
//!
//! # use hackaplan_core::traits::Fetcher;
//! # #[derive(Clone)] struct MyFetcher;
//! # impl Fetcher for MyFetcher {
//! #     async fn fetch(&self, _: &str, _: Duration) -> Result<String, hackaplan_core::AppError> { todo!() }
//! # }
//! # async fn run() -> Result<(), hackaplan_core::AppError> {
//! let policy = RetryPolicy::new(3, Duration::from_millis(600), Duration::from_secs(20));
//! let fetcher = RetryingFetcher::new(MyFetcher);
//! let html = fetcher.fetch_with("https://example.devpost.com", &policy).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use crate::error::AppError;
use crate::traits::Fetcher;

/// Attempt budget and backoff schedule for one class of request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Wait after the first failed attempt; doubles on each further failure.
    pub base_delay: Duration,

    /// Upper bound for the computed backoff.
    pub max_delay: Duration,

    /// Upper bound for a server-supplied `Retry-After` hint.
    pub max_retry_after: Duration,

    /// Add uniform [0, base_delay) jitter to each wait.
    pub jitter: bool,

    /// Per-attempt timeout handed to the inner fetcher.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(10),
            max_retry_after: Duration::from_secs(60),
            jitter: false,
            timeout,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_retry_after(mut self, max_retry_after: Duration) -> Self {
        self.max_retry_after = max_retry_after;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff after failed attempt number `attempt` (1-indexed), without
    /// jitter: `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        std::cmp::min(delay, self.max_delay)
    }

    /// Wait before the next attempt, including jitter and any server hint.
    fn next_wait(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let mut wait = self.delay_for_attempt(attempt);
        if self.jitter {
            wait += Duration::from_millis(rand_jitter_ms(self.base_delay.as_millis() as u64));
        }
        if let Some(hint) = hint {
            wait = wait.max(hint.min(self.max_retry_after));
        }
        wait
    }
}

impl Default for RetryPolicy {
    /// Listing-page defaults: 3 attempts, 600ms base, 20s per attempt.
    fn default() -> Self {
        Self::new(3, Duration::from_millis(600), Duration::from_secs(20))
    }
}

/// A [`Fetcher`] wrapper that retries transient failures.
///
/// Every wait is a `tokio::time::sleep`, so dropping the returned future
/// (for example on a job timeout) aborts the retry loop immediately.
#[derive(Clone)]
pub struct RetryingFetcher<F> {
    inner: F,
}

impl<F: Fetcher> RetryingFetcher<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Fetch `url` under `policy`.
    ///
    /// Returns [`AppError::FetchFailed`] when the error is permanent or the
    /// attempts are exhausted.
    pub async fn fetch_with(&self, url: &str, policy: &RetryPolicy) -> Result<String, AppError> {
        let mut attempt = 1;
        loop {
            match self.inner.fetch(url, policy.timeout).await {
                Ok(body) => return Ok(body),
                Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                    let wait = policy.next_wait(attempt, err.retry_after());
                    tracing::warn!(
                        %url,
                        attempt,
                        delay_ms = wait.as_millis() as u64,
                        error = %err,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::warn!(%url, attempts = attempt, error = %err, "Fetch gave up");
                    return Err(AppError::FetchFailed {
                        url: url.to_string(),
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Deterministic jitter based on std, avoids pulling in the `rand` crate.
// Uses a simple xorshift seeded from the current time.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
