//! Error types for outbound integration calls.
//!
//! Every failure the crate can surface is a variant of [`Error`]. Failures that
//! come back from a remote destination keep as much of the raw exchange as
//! possible (status, body, headers) so that callers can log or translate them
//! without re-issuing the request.

use http::{HeaderMap, StatusCode};

/// Whether a failed attempt is worth repeating.
///
/// The [`RetryExecutor`](crate::retry::RetryExecutor) only retries
/// [`FailureClass::Transient`] failures. Permanent failures are returned to the
/// caller unchanged after the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network trouble, throttling or an upstream 5xx/429.
    Transient,
    /// Anything that would fail the same way on every attempt.
    Permanent,
}

/// The main error type for outbound calls and background submissions.
///
/// # Examples
///
/// ```no_run
/// use outcall::{Client, Error, RequestSpec};
/// use http::Method;
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let spec = client
///     .request(Method::GET, "/members/{id}")
///     .path_var("id", "me")
///     .build()?;
///
/// match client.execute::<serde_json::Value>(spec).await {
///     Ok(response) => println!("Success: {:?}", response.data),
///     Err(Error::RetryExhausted { attempts, last_error }) => {
///         eprintln!("gave up after {} attempts: {}", attempts, last_error);
///     }
///     Err(Error::HttpError { status, raw_response, .. }) => {
///         eprintln!("rejected with {}: {}", status, raw_response);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error occurred (connection refused, DNS failure, reset, ...).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The transport timed out waiting for the destination.
    #[error("Request timed out")]
    Timeout,

    /// The response body could not be deserialized into the expected shape.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// The destination answered with a non-2xx status.
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
        /// Rate limit information parsed from headers
        rate_limit_info: Option<crate::rate_limit::RateLimitInfo>,
    },

    /// A required piece of configuration is missing or invalid.
    ///
    /// Raised synchronously while building a request or a client, e.g. when no
    /// destination base URL was provided.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A `{placeholder}` in the path template has no matching path variable,
    /// or the template itself is malformed.
    #[error("Unresolved placeholder `{placeholder}` in path template `{template}`")]
    TemplateError {
        /// The path template being resolved
        template: String,
        /// The placeholder that could not be resolved
        placeholder: String,
    },

    /// The destination's rate limiter has no capacity and no room to wait.
    #[error("Rate limit exceeded for destination `{destination}`")]
    Throttled {
        /// Name of the throttled destination
        destination: String,
    },

    /// Every attempt allowed by the retry budget failed transiently.
    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// The number of attempts made
        attempts: u32,
        /// The last transient error encountered
        last_error: Box<Error>,
    },

    /// The request body could not be serialized.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// The body has no registered transform into wire form, or the transform failed.
    #[error("Body processing failed: {0}")]
    BodyProcessing(String),

    /// An invalid URL was produced or provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A queued executor rejected a submission because its queue is full.
    #[error("Executor `{executor}` queue is full (capacity {capacity})")]
    QueueFull {
        /// Name of the executor
        executor: String,
        /// Configured queue capacity
        capacity: usize,
    },

    /// No executor is registered under the requested name.
    #[error("No executor registered under `{0}`")]
    ExecutorNotFound(String),

    /// An executor is already registered under this name.
    #[error("An executor is already registered under `{0}`")]
    DuplicateExecutor(String),

    /// The executor has been shut down and no longer accepts work.
    #[error("Executor `{0}` is shut down")]
    ExecutorClosed(String),

    /// The call was cancelled before it could complete.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Classifies this error for retry purposes.
    ///
    /// Network errors, timeouts, local throttling, 5xx responses and 429
    /// responses are transient. Everything else is permanent.
    ///
    /// # Examples
    ///
    /// ```
    /// use outcall::{Error, FailureClass};
    /// use http::StatusCode;
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::SERVICE_UNAVAILABLE,
    ///     raw_response: "try later".to_string(),
    ///     headers: http::HeaderMap::new(),
    ///     rate_limit_info: None,
    /// };
    /// assert_eq!(err.classify(), FailureClass::Transient);
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::UNAUTHORIZED,
    ///     raw_response: "invalid key".to_string(),
    ///     headers: http::HeaderMap::new(),
    ///     rate_limit_info: None,
    /// };
    /// assert_eq!(err.classify(), FailureClass::Permanent);
    /// ```
    pub fn classify(&self) -> FailureClass {
        match self {
            Error::Network(_) | Error::Timeout | Error::Throttled { .. } => FailureClass::Transient,
            Error::HttpError { status, .. }
                if status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS =>
            {
                FailureClass::Transient
            }
            _ => FailureClass::Permanent,
        }
    }

    /// Returns `true` if this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        self.classify() == FailureClass::Transient
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            Error::RetryExhausted { last_error, .. } => last_error.status(),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns upstream rate limit information if the destination sent any.
    pub fn rate_limit_info(&self) -> Option<&crate::rate_limit::RateLimitInfo> {
        match self {
            Error::HttpError {
                rate_limit_info, ..
            } => rate_limit_info.as_ref(),
            _ => None,
        }
    }

    /// Returns the delay the destination asked for, capped by `max_wait`.
    pub fn rate_limit_delay(&self, max_wait: std::time::Duration) -> Option<std::time::Duration> {
        self.rate_limit_info()?.delay(max_wait)
    }
}

/// A specialized `Result` type for outbound calls.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by background work items.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
