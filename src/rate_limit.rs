//! Rate limiting: local admission control and upstream rate limit hints.
//!
//! [`RateLimiter`] is a fixed-window limiter shared by every caller talking to
//! one destination. Each attempt of a call acquires a [`Lease`] from it before
//! touching the network. [`RateLimiters`] keeps one limiter per destination for
//! the lifetime of the process.
//!
//! Destinations also tell us when we went too fast, through `Retry-After` and
//! `X-RateLimit-*` headers. [`RateLimitInfo`] parses those so the retry loop
//! can wait for as long as the destination asked instead of its own backoff.

use crate::{Error, Result};
use http::HeaderMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// A granted unit of capacity for one attempt.
///
/// Permits are not returned: a fixed window replenishes by time alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    permits: u32,
    window_start: Instant,
}

impl Lease {
    /// Number of permits granted.
    pub fn permits(&self) -> u32 {
        self.permits
    }

    /// Start of the window the permits were taken from.
    pub fn window_start(&self) -> Instant {
        self.window_start
    }
}

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    issued: u32,
    waiting: usize,
}

impl WindowState {
    fn roll(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.issued = 0;
        }
    }
}

/// Fixed-window admission control for one destination.
///
/// At most `limit` permits are issued per `window`. A caller that finds the
/// window exhausted waits for the next window, unless `queue_depth` callers
/// are already waiting, in which case it fails immediately with
/// [`Error::Throttled`].
///
/// # Examples
///
/// ```
/// use outcall::rate_limit::RateLimiter;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), outcall::Error> {
/// let limiter = RateLimiter::new("boards", 100, Duration::from_secs(10), 32);
///
/// let lease = limiter.acquire().await?;
/// assert_eq!(lease.permits(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    destination: String,
    limit: u32,
    window: Duration,
    queue_depth: usize,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    /// Creates a limiter issuing `limit` permits per `window`, with room for
    /// `queue_depth` waiting callers.
    pub fn new(
        destination: impl Into<String>,
        limit: u32,
        window: Duration,
        queue_depth: usize,
    ) -> Self {
        Self {
            destination: destination.into(),
            limit,
            window,
            queue_depth,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                issued: 0,
                waiting: 0,
            }),
        }
    }

    /// The destination this limiter guards.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Permits per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Permits still available in the current window.
    pub fn available(&self) -> u32 {
        let mut state = self.state.lock();
        state.roll(Instant::now(), self.window);
        self.limit - state.issued
    }

    /// Number of callers currently waiting for a window.
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }

    /// Acquires one permit.
    pub async fn acquire(&self) -> Result<Lease> {
        self.acquire_many(1).await
    }

    /// Acquires `permits` permits, waiting for a later window if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Throttled`] if the waiter queue is full, or if
    /// `permits` exceeds the per-window limit and can never be granted.
    pub async fn acquire_many(&self, permits: u32) -> Result<Lease> {
        if permits > self.limit {
            tracing::warn!(
                destination = %self.destination,
                permits = permits,
                limit = self.limit,
                "Requested more permits than a window holds"
            );
            return Err(self.throttled());
        }

        let mut slot: Option<WaitSlot<'_>> = None;
        loop {
            let wake_at = {
                let mut state = self.state.lock();
                state.roll(Instant::now(), self.window);

                if state.issued + permits <= self.limit {
                    state.issued += permits;
                    if let Some(mut slot) = slot.take() {
                        slot.armed = false;
                        state.waiting -= 1;
                    }
                    return Ok(Lease {
                        permits,
                        window_start: state.window_start,
                    });
                }

                if slot.is_none() {
                    if state.waiting >= self.queue_depth {
                        tracing::warn!(
                            destination = %self.destination,
                            waiting = state.waiting,
                            "Rate limit exceeded and waiter queue is full"
                        );
                        return Err(self.throttled());
                    }
                    state.waiting += 1;
                    slot = Some(WaitSlot {
                        limiter: self,
                        armed: true,
                    });
                }

                state.window_start + self.window
            };

            tracing::debug!(
                destination = %self.destination,
                wait_ms = wake_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Window exhausted, waiting for the next one"
            );
            tokio::time::sleep_until(wake_at).await;
        }
    }

    fn throttled(&self) -> Error {
        Error::Throttled {
            destination: self.destination.clone(),
        }
    }
}

/// A reserved place in the waiter queue, released if the waiting future is dropped.
struct WaitSlot<'a> {
    limiter: &'a RateLimiter,
    armed: bool,
}

impl Drop for WaitSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.limiter.state.lock().waiting -= 1;
        }
    }
}

/// Process-wide limiters, one per destination.
#[derive(Debug, Default)]
pub struct RateLimiters {
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiters {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the limiter for `destination`, creating it with `create` on first use.
    pub fn get_or_insert_with(
        &self,
        destination: &str,
        create: impl FnOnce() -> RateLimiter,
    ) -> Arc<RateLimiter> {
        if let Some(limiter) = self.limiters.read().get(destination) {
            return Arc::clone(limiter);
        }
        let mut limiters = self.limiters.write();
        Arc::clone(
            limiters
                .entry(destination.to_string())
                .or_insert_with(|| Arc::new(create())),
        )
    }

    /// Returns the limiter for `destination`, if one exists.
    pub fn get(&self, destination: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.read().get(destination).cloned()
    }
}

/// Information extracted from upstream rate limit headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// When the upstream limit resets (`X-RateLimit-Reset` / `RateLimit-Reset`).
    pub reset_at: Option<SystemTime>,

    /// How long to wait before retrying (`Retry-After`).
    pub retry_after: Option<Duration>,

    /// Requests remaining in the upstream window (`X-RateLimit-Remaining`).
    pub remaining: Option<u64>,
}

impl RateLimitInfo {
    /// Parses rate limit headers.
    ///
    /// `Retry-After` may be delay-seconds or an HTTP date; reset headers are
    /// Unix timestamps.
    ///
    /// # Examples
    ///
    /// ```
    /// use outcall::rate_limit::RateLimitInfo;
    /// use http::HeaderMap;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "60".parse().unwrap());
    ///
    /// let info = RateLimitInfo::from_headers(&headers);
    /// assert!(info.is_rate_limited());
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            reset_at: header_timestamp(headers, "x-ratelimit-reset")
                .or_else(|| header_timestamp(headers, "ratelimit-reset")),
            retry_after: parse_retry_after(headers),
            remaining: header_str(headers, "x-ratelimit-remaining").and_then(|v| v.parse().ok()),
        }
    }

    /// The delay the destination asked for, capped by `max_wait`.
    ///
    /// `Retry-After` takes precedence over the reset timestamp.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        let delay = match (self.retry_after, self.reset_at) {
            (Some(retry_after), _) => retry_after,
            (None, Some(reset_at)) => reset_at.duration_since(SystemTime::now()).ok()?,
            (None, None) => return None,
        };
        Some(delay.min(max_wait))
    }

    /// Returns `true` if the headers describe an active limit or a wait.
    pub fn is_rate_limited(&self) -> bool {
        self.retry_after.is_some() || self.reset_at.is_some() || self.remaining == Some(0)
    }
}

/// How upstream rate limit hints are treated.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether upstream rate limit headers are parsed at all.
    pub enabled: bool,

    /// Upper bound on any upstream-requested wait. Defaults to 5 minutes.
    pub max_wait: Duration,

    /// Whether an upstream-requested delay replaces the retry backoff.
    pub respect_retry_after: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_wait: Duration::from_secs(300),
            respect_retry_after: true,
        }
    }
}

impl RateLimitConfig {
    /// Creates a builder.
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// Ignores upstream rate limit headers entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// The delay to honor for `error`, if the configuration allows one.
    pub(crate) fn upstream_delay(&self, error: &Error) -> Option<Duration> {
        if self.enabled && self.respect_retry_after {
            error.rate_limit_delay(self.max_wait)
        } else {
            None
        }
    }
}

/// Builder for [`RateLimitConfig`].
#[derive(Debug, Default)]
pub struct RateLimitConfigBuilder {
    enabled: Option<bool>,
    max_wait: Option<Duration>,
    respect_retry_after: Option<bool>,
}

impl RateLimitConfigBuilder {
    /// Sets whether upstream headers are parsed.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Sets the cap on upstream-requested waits.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Sets whether upstream-requested delays replace the backoff.
    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = Some(respect);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> RateLimitConfig {
        let default = RateLimitConfig::default();
        RateLimitConfig {
            enabled: self.enabled.unwrap_or(default.enabled),
            max_wait: self.max_wait.unwrap_or(default.max_wait),
            respect_retry_after: self
                .respect_retry_after
                .unwrap_or(default.respect_retry_after),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn header_timestamp(headers: &HeaderMap, name: &str) -> Option<SystemTime> {
    let seconds = header_str(headers, name)?.parse::<u64>().ok()?;
    Some(UNIX_EPOCH + Duration::from_secs(seconds))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = header_str(headers, "retry-after")?;
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    httpdate::parse_http_date(value)
        .ok()?
        .duration_since(SystemTime::now())
        .ok()
}
