//! Declarative setup of destinations and executors.
//!
//! An [`IntegrationConfig`] is usually loaded from TOML at startup:
//!
//! ```toml
//! [destinations.tracker]
//! base_url = "https://api.tracker.example/1"
//! default_api_key = "app-key"
//! timeout_ms = 30000
//!
//! [destinations.tracker.rate_limit]
//! limit = 10
//! window_ms = 1000
//! queue_depth = 64
//!
//! [destinations.tracker.backoff]
//! kind = "exponential"
//! initial_delay_ms = 100
//! max_delay_ms = 5000
//!
//! [destinations.payments]
//! base_url = "https://pay.example/api/v1"
//! headers = { "X-Api-Key" = "merchant-key" }
//!
//! [executors]
//! queue_capacity = 128
//! policy = "reject"
//! ```

use crate::executor::{
    ExecutorRegistry, ImmediateExecutor, QueuePolicy, QueuedExecutor, IMMEDIATE, QUEUED,
};
use crate::rate_limit::{RateLimiter, RateLimiters};
use crate::request::DEFAULT_RETRY_BUDGET;
use crate::retry::{Backoff, DEFAULT_BACKOFF_DELAY};
use crate::url_builder::DEFAULT_API_KEY_PARAM;
use crate::{Client, Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default capacity of the `queued` executor.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    /// Destinations by name.
    pub destinations: BTreeMap<String, DestinationConfig>,

    /// Background executor settings.
    pub executors: ExecutorsConfig,
}

/// Everything needed to talk to one destination.
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    /// Root URL every request path is joined onto.
    pub base_url: String,

    /// Query parameter carrying the API key.
    #[serde(default = "default_api_key_param")]
    pub api_key_param: String,

    /// API key sent when a request carries none.
    #[serde(default)]
    pub default_api_key: Option<String>,

    /// Headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Per-attempt transport timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Total attempts per call, including the first.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Delay between attempts when the destination gives no hint.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Local admission control. No limiter when absent.
    #[serde(default)]
    pub rate_limit: Option<RateLimiterConfig>,
}

fn default_api_key_param() -> String {
    DEFAULT_API_KEY_PARAM.to_string()
}

fn default_retry_budget() -> u32 {
    DEFAULT_RETRY_BUDGET
}

/// Delay between attempts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// The same delay before every retry.
    Fixed {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// Doubling delay, capped at `max_delay_ms`.
    Exponential {
        /// Delay before the first retry, in milliseconds.
        initial_delay_ms: u64,
        /// Upper bound for any single delay, in milliseconds.
        max_delay_ms: u64,
        /// Randomize each delay within its bound.
        #[serde(default)]
        jitter: bool,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Fixed {
            delay_ms: DEFAULT_BACKOFF_DELAY.as_millis() as u64,
        }
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        match *config {
            BackoffConfig::Fixed { delay_ms } => Backoff::Fixed(Duration::from_millis(delay_ms)),
            BackoffConfig::Exponential {
                initial_delay_ms,
                max_delay_ms,
                jitter,
            } => Backoff::Exponential {
                initial_delay: Duration::from_millis(initial_delay_ms),
                max_delay: Duration::from_millis(max_delay_ms),
                jitter,
            },
        }
    }
}

/// `limit` permits per `window_ms`, with at most `queue_depth` waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimiterConfig {
    /// Permits granted per window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Callers allowed to wait for the next window; `0` rejects at once.
    #[serde(default)]
    pub queue_depth: usize,
}

/// Settings for the standard executors.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorsConfig {
    /// Pending items the `queued` executor holds.
    pub queue_capacity: usize,
    /// What `submit` does when the queue is full.
    pub policy: QueuePolicy,
}

impl Default for ExecutorsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            policy: QueuePolicy::default(),
        }
    }
}

impl IntegrationConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the document is malformed or a
    /// value is out of range.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::ConfigurationError(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file and parses it with [`from_toml_str`](Self::from_toml_str).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigurationError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        for (name, destination) in &self.destinations {
            if destination.retry_budget == 0 {
                return Err(Error::ConfigurationError(format!(
                    "Destination `{}`: retry_budget must be at least 1",
                    name
                )));
            }
            if let Some(limit) = destination.rate_limit {
                if limit.limit == 0 || limit.window_ms == 0 {
                    return Err(Error::ConfigurationError(format!(
                        "Destination `{}`: rate limit and window must be positive",
                        name
                    )));
                }
            }
        }
        if self.executors.queue_capacity == 0 {
            return Err(Error::ConfigurationError(
                "executors.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The destination named `name`.
    pub fn destination(&self, name: &str) -> Result<&DestinationConfig> {
        self.destinations
            .get(name)
            .ok_or_else(|| Error::ConfigurationError(format!("Unknown destination `{}`", name)))
    }

    /// Builds a client for the destination named `name`.
    ///
    /// The destination's limiter is taken from `limiters`, so every client
    /// built for the same destination shares one window.
    pub fn client_for(&self, name: &str, limiters: &RateLimiters) -> Result<Client> {
        let destination = self.destination(name)?;

        let mut builder = Client::builder()
            .destination(name)
            .base_url(&destination.base_url)?
            .api_key_param(&destination.api_key_param)
            .retry_budget(destination.retry_budget)
            .backoff(Backoff::from(&destination.backoff));

        if let Some(key) = &destination.default_api_key {
            builder = builder.default_api_key(key);
        }
        for (header, value) in &destination.headers {
            builder = builder.default_header(header, value)?;
        }
        if let Some(timeout_ms) = destination.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(limit) = destination.rate_limit {
            let limiter = limiters.get_or_insert_with(name, || {
                RateLimiter::new(
                    name,
                    limit.limit,
                    Duration::from_millis(limit.window_ms),
                    limit.queue_depth,
                )
            });
            builder = builder.rate_limiter(limiter);
        }

        builder.build()
    }

    /// Starts the `queued` and `immediate` executors and registers them.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn executor_registry(&self) -> Result<ExecutorRegistry> {
        let registry = ExecutorRegistry::new();
        registry.register(
            QUEUED,
            Arc::new(QueuedExecutor::start(
                QUEUED,
                self.executors.queue_capacity,
                self.executors.policy,
            )?),
        )?;
        registry.register(IMMEDIATE, Arc::new(ImmediateExecutor::new(IMMEDIATE)))?;
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    const SAMPLE: &str = r#"
        [destinations.tracker]
        base_url = "https://api.tracker.example/1"
        default_api_key = "app-key"
        timeout_ms = 5000

        [destinations.tracker.rate_limit]
        limit = 10
        window_ms = 1000
        queue_depth = 4

        [destinations.tracker.backoff]
        kind = "exponential"
        initial_delay_ms = 100
        max_delay_ms = 5000

        [destinations.payments]
        base_url = "https://pay.example/api/v1"
        headers = { "X-Api-Key" = "merchant-key" }

        [executors]
        queue_capacity = 8
        policy = "reject"
    "#;

    #[test]
    fn test_parses_destinations_with_defaults() {
        let config = IntegrationConfig::from_toml_str(SAMPLE).unwrap();

        let tracker = config.destination("tracker").unwrap();
        assert_eq!(tracker.api_key_param, "key");
        assert_eq!(tracker.retry_budget, DEFAULT_RETRY_BUDGET);
        assert_eq!(
            tracker.rate_limit,
            Some(RateLimiterConfig {
                limit: 10,
                window_ms: 1000,
                queue_depth: 4
            })
        );
        assert_eq!(
            Backoff::from(&tracker.backoff),
            Backoff::Exponential {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                jitter: false,
            }
        );

        let payments = config.destination("payments").unwrap();
        assert_eq!(payments.backoff, BackoffConfig::default());
        assert!(payments.rate_limit.is_none());

        assert_eq!(config.executors.queue_capacity, 8);
        assert_eq!(config.executors.policy, QueuePolicy::Reject);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let zero_budget = r#"
            [destinations.tracker]
            base_url = "https://api.tracker.example"
            retry_budget = 0
        "#;
        assert!(matches!(
            IntegrationConfig::from_toml_str(zero_budget),
            Err(Error::ConfigurationError(_))
        ));

        let zero_window = r#"
            [destinations.tracker]
            base_url = "https://api.tracker.example"
            rate_limit = { limit = 5, window_ms = 0 }
        "#;
        assert!(IntegrationConfig::from_toml_str(zero_window).is_err());

        assert!(IntegrationConfig::from_toml_str("destinations = 3").is_err());
    }

    #[test]
    fn test_client_for_shares_limiter() {
        let config = IntegrationConfig::from_toml_str(SAMPLE).unwrap();
        let limiters = RateLimiters::new();

        let first = config.client_for("tracker", &limiters).unwrap();
        let second = config.client_for("tracker", &limiters).unwrap();
        assert_eq!(first.destination(), "tracker");
        assert!(Arc::ptr_eq(
            first.rate_limiter().unwrap(),
            second.rate_limiter().unwrap()
        ));

        let spec = first.request(Method::GET, "/boards").build().unwrap();
        assert_eq!(
            first.url_for(&spec).unwrap().as_str(),
            "https://api.tracker.example/1/boards?key=app-key"
        );

        assert!(config.client_for("nowhere", &limiters).is_err());
    }

    #[tokio::test]
    async fn test_executor_registry_has_standard_executors() {
        let config = IntegrationConfig::default();
        let registry = config.executor_registry().unwrap();
        assert_eq!(
            registry.names(),
            vec![IMMEDIATE.to_string(), QUEUED.to_string()]
        );
        registry.shutdown_all().await;
    }
}
