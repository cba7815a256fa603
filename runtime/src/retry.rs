//! Retry logic with exponential backoff for transient store failures.
//!
//! Reads and subscription setup are retried a bounded number of times. Writes
//! are never retried here: a blind retry of a transition could apply a change
//! the caller no longer intends.
//!
//! # Example
//!
//! ```rust
//! use reservation_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .initial_delay(Duration::from_millis(50))
//!     .build();
//!
//! let value = retry_with_predicate(
//!     &policy,
//!     "get",
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("transient"),
//! )
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Hard upper bound on attempts for store reads and subscriptions.
pub const MAX_STORE_ATTEMPTS: u32 = 3;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 3 (initial attempt included)
/// - `initial_delay`: 50ms
/// - `max_delay`: 2 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: enabled
///
/// Policies are only built through [`RetryPolicy::builder`], which keeps
/// `max_attempts` within `1..=MAX_STORE_ATTEMPTS`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: MAX_STORE_ATTEMPTS,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Maximum number of attempts, including the first one.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Cap for exponential backoff.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Calculate delay before retry number `retry` (0-indexed).
    ///
    /// `delay = min(initial_delay * multiplier^retry, max_delay)`, scaled by
    /// a random factor in `0.5..=1.0` when jitter is enabled.
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        use rand::Rng;

        #[allow(clippy::cast_possible_wrap)]
        let base_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(retry as i32);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());

        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            1.0
        };
        Duration::from_secs_f64(capped_secs * factor)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl RetryPolicyBuilder {
    /// Set maximum number of attempts, clamped to `1..=MAX_STORE_ATTEMPTS`.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.clamp(1, MAX_STORE_ATTEMPTS);
        self
    }

    /// Set delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

/// Retry an async operation while `is_retryable` accepts its error.
///
/// Non-retryable errors are returned immediately. When attempts run out the
/// last error is returned.
///
/// # Errors
///
/// Returns the operation's error once it is non-retryable or attempts are
/// exhausted.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &'static str,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempts,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }

                if !policy.should_retry(attempts) {
                    tracing::error!(
                        operation = operation_name,
                        attempts,
                        error = %err,
                        "Operation failed after max attempts"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_retry(attempts - 1);
                tracing::warn!(
                    operation = operation_name,
                    attempts,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );
                crate::metrics::store::record_retry(operation_name);

                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1))
            .jitter(false)
            .build()
    }

    #[test]
    fn test_retry_policy_delay_calculation() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .jitter(false)
            .build();

        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(400));
    }

    #[test]
    fn test_retry_policy_max_delay_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .jitter(false)
            .build();

        assert_eq!(policy.delay_for_retry(5), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .build();
        for _ in 0..50 {
            let delay = policy.delay_for_retry(0);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_max_attempts_is_clamped() {
        assert_eq!(RetryPolicy::builder().max_attempts(10).build().max_attempts(), 3);
        assert_eq!(RetryPolicy::builder().max_attempts(0).build().max_attempts(), 1);
        assert!(!RetryPolicy::default().should_retry(MAX_STORE_ATTEMPTS));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_predicate(
            &fast_policy(),
            "test",
            || {
                let c = Arc::clone(&counter_clone);
                async move {
                    let attempt = c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(format!("transient failure {attempt}"))
                    } else {
                        Ok(42)
                    }
                }
            },
            |err: &String| err.contains("transient"),
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_three_attempts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_predicate(
            &fast_policy(),
            "test",
            || {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("transient failure")
                }
            },
            |err: &&str| err.contains("transient"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_with_predicate_skips_non_retryable() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_predicate(
            &fast_policy(),
            "test",
            || {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("permanent error")
                }
            },
            |err: &&str| err.contains("transient"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
