//! Bounded retries for transient failures.
//!
//! [`RetryExecutor`] runs one logical call as a series of attempts. Before each
//! attempt it checks the cancellation token and takes a fresh lease from the
//! destination's [`RateLimiter`]. A failed attempt is classified through a
//! [`RetryPredicate`] (by default [`Error::classify`]); permanent failures are
//! returned unchanged, transient ones are retried after a [`Backoff`] delay
//! until the retry budget is spent.

use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay used by [`Backoff::default`].
pub const DEFAULT_BACKOFF_DELAY: Duration = Duration::from_millis(200);

/// How long to wait between attempts.
///
/// # Examples
///
/// ```
/// use outcall::Backoff;
/// use std::time::Duration;
///
/// let fixed = Backoff::Fixed(Duration::from_millis(250));
/// assert_eq!(fixed.delay_for_attempt(3), Duration::from_millis(250));
///
/// // 100ms, 200ms, 400ms, ... capped at 5s
/// let exponential = Backoff::Exponential {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(5),
///     jitter: false,
/// };
/// assert_eq!(exponential.delay_for_attempt(3), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed(Duration),

    /// `initial_delay * 2^(attempt - 1)`, capped at `max_delay`.
    ///
    /// With `jitter` the delay is scaled by a random factor in `[0.5, 1.0]`.
    Exponential {
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Upper bound on any delay.
        max_delay: Duration,
        /// Whether to randomize delays.
        jitter: bool,
    },

    /// Delay computed from the number of the attempt that just failed.
    Custom {
        /// Maps the 1-indexed failed attempt to a delay.
        delay_fn: fn(attempt: u32) -> Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed(DEFAULT_BACKOFF_DELAY)
    }
}

impl Backoff {
    /// Returns the delay after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial_delay,
                max_delay,
                jitter,
            } => {
                let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
                let delay = initial_delay.saturating_mul(multiplier).min(*max_delay);
                if *jitter {
                    delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
                } else {
                    delay
                }
            }
            Backoff::Custom { delay_fn } => delay_fn(attempt),
        }
    }
}

/// Decides whether a failed attempt should be retried.
///
/// Any `Fn(&Error, u32) -> bool` closure is a predicate.
///
/// # Examples
///
/// ```
/// use outcall::{Error, RetryPredicate};
///
/// struct RetryOnRateLimit;
///
/// impl RetryPredicate for RetryOnRateLimit {
///     fn should_retry(&self, error: &Error, _attempt: u32) -> bool {
///         matches!(
///             error,
///             Error::HttpError { status, .. } if status.as_u16() == 429
///         )
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// Returns `true` if `error`, raised by the 1-indexed `attempt`, is transient.
    fn should_retry(&self, error: &Error, attempt: u32) -> bool;
}

impl<F> RetryPredicate for F
where
    F: Fn(&Error, u32) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        self(error, attempt)
    }
}

/// Retries exactly the errors [`Error::classify`] marks as transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOnTransient;

impl RetryPredicate for RetryOnTransient {
    fn should_retry(&self, error: &Error, _attempt: u32) -> bool {
        error.is_retryable()
    }
}

/// Runs an operation with classification, backoff and a bounded budget.
///
/// The executor itself holds only configuration; attempt counting is local to
/// each [`execute`](Self::execute) call, so one executor can be shared by any
/// number of concurrent calls.
///
/// # Examples
///
/// ```
/// use outcall::{Backoff, Error, RetryExecutor};
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Error> {
/// let executor = RetryExecutor::builder()
///     .backoff(Backoff::Fixed(Duration::from_millis(10)))
///     .build();
///
/// let value = executor
///     .execute(None, 3, &CancellationToken::new(), |attempt| async move {
///         if attempt < 2 {
///             Err(Error::Timeout)
///         } else {
///             Ok(attempt)
///         }
///     })
///     .await?;
/// assert_eq!(value, 2);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RetryExecutor {
    backoff: Backoff,
    predicate: Arc<dyn RetryPredicate>,
    rate_limit_config: RateLimitConfig,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("backoff", &self.backoff)
            .field("rate_limit_config", &self.rate_limit_config)
            .finish_non_exhaustive()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryExecutor {
    /// Creates a builder.
    pub fn builder() -> RetryExecutorBuilder {
        RetryExecutorBuilder::default()
    }

    /// The configured backoff.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Runs `operation` until it succeeds, fails permanently, the budget is
    /// spent, or `cancel` fires.
    ///
    /// `operation` receives the 1-indexed attempt number. When `limiter` is
    /// given, each attempt first acquires a lease from it; a
    /// [`Throttled`](Error::Throttled) rejection counts as a transient failure
    /// of that attempt.
    ///
    /// # Errors
    ///
    /// - the attempt's own error, unchanged, if it is permanent,
    /// - [`Error::RetryExhausted`] wrapping the last transient error once
    ///   `retry_budget` attempts have failed,
    /// - [`Error::Cancelled`] if `cancel` fires before or between attempts.
    pub async fn execute<T, F, Fut>(
        &self,
        limiter: Option<&RateLimiter>,
        retry_budget: u32,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let budget = retry_budget.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                tracing::debug!(attempt = attempt, "Call cancelled before next attempt");
                return Err(Error::Cancelled);
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = Self::attempt(limiter, &mut operation, attempt) => result,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempts = attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            tracing::warn!(
                error = %error,
                attempt = attempt,
                retry_budget = budget,
                "Attempt failed"
            );

            if !self.predicate.should_retry(&error, attempt) {
                return Err(error);
            }
            if attempt >= budget {
                return Err(Error::RetryExhausted {
                    attempts: attempt,
                    last_error: Box::new(error),
                });
            }

            let delay = match self.rate_limit_config.upstream_delay(&error) {
                Some(delay) => {
                    tracing::info!(
                        rate_limit_delay_ms = delay.as_millis() as u64,
                        attempt = attempt,
                        "Rate limited upstream - waiting before retry"
                    );
                    delay
                }
                None => {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    tracing::info!(
                        delay_ms = delay.as_millis() as u64,
                        attempt = attempt,
                        "Retrying after delay"
                    );
                    delay
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt<T, F, Fut>(
        limiter: Option<&RateLimiter>,
        operation: &mut F,
        attempt: u32,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(limiter) = limiter {
            limiter.acquire().await?;
        }
        operation(attempt).await
    }
}

/// Builder for [`RetryExecutor`].
#[derive(Default)]
pub struct RetryExecutorBuilder {
    backoff: Option<Backoff>,
    predicate: Option<Arc<dyn RetryPredicate>>,
    rate_limit_config: Option<RateLimitConfig>,
}

impl RetryExecutorBuilder {
    /// Sets the delay between attempts. Defaults to a fixed 200ms.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Overrides failure classification. Defaults to [`RetryOnTransient`].
    pub fn predicate(mut self, predicate: impl RetryPredicate + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Sets how upstream rate limit hints affect the delay.
    pub fn rate_limit_config(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit_config = Some(config);
        self
    }

    /// Builds the executor.
    pub fn build(self) -> RetryExecutor {
        RetryExecutor {
            backoff: self.backoff.unwrap_or_default(),
            predicate: self
                .predicate
                .unwrap_or_else(|| Arc::new(RetryOnTransient)),
            rate_limit_config: self.rate_limit_config.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor() -> RetryExecutor {
        RetryExecutor::builder()
            .backoff(Backoff::Fixed(Duration::from_millis(10)))
            .build()
    }

    fn server_error() -> Error {
        Error::HttpError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            raw_response: "unavailable".to_string(),
            headers: http::HeaderMap::new(),
            rate_limit_info: None,
        }
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let backoff = Backoff::Exponential {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: false,
        };

        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(40), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = Backoff::Exponential {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: true,
        };
        for _ in 0..50 {
            let delay = backoff.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_budget() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = executor()
            .execute(None, 3, &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::RetryExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
            }
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = executor()
            .execute(None, 3, &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::ConfigurationError("bad key".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::ConfigurationError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failure() {
        let value = executor()
            .execute(None, 3, &CancellationToken::new(), |attempt| async move {
                if attempt == 1 {
                    Err(Error::Timeout)
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<()> = executor()
            .execute(None, 3, &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retrying() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::builder()
            .backoff(Backoff::Fixed(Duration::from_secs(60)))
            .build();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result: Result<()> = executor
            .execute(None, 5, &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Timeout) }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_takes_a_lease() {
        let limiter = RateLimiter::new("boards", 10, Duration::from_secs(60), 0);

        let result: Result<()> = executor()
            .execute(Some(&limiter), 4, &CancellationToken::new(), |_| async {
                Err(Error::Timeout)
            })
            .await;

        assert!(matches!(result, Err(Error::RetryExhausted { attempts: 4, .. })));
        assert_eq!(limiter.available(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_attempt_is_transient() {
        let limiter = RateLimiter::new("boards", 1, Duration::from_secs(60), 0);
        limiter.acquire().await.unwrap();
        let calls = AtomicU32::new(0);

        let result: Result<()> = executor()
            .execute(Some(&limiter), 2, &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match result {
            Err(Error::RetryExhausted { last_error, .. }) => {
                assert!(matches!(*last_error, Error::Throttled { .. }))
            }
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closure_predicate() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::builder()
            .backoff(Backoff::Fixed(Duration::from_millis(1)))
            .predicate(|error: &Error, _attempt: u32| error.status() == Some(StatusCode::CONFLICT))
            .build();

        let result: Result<()> = executor
            .execute(None, 2, &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::HttpError { .. })));
    }
}
