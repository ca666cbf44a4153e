//! The per-destination HTTP client.
//!
//! A [`Client`] ties together everything one destination needs: its base URL
//! and credential defaults (through a [`UrlBuilder`]), its shared
//! [`RateLimiter`], and a [`RetryExecutor`]. Calls are described as
//! [`RequestSpec`]s and run with [`Client::execute`].

use crate::{
    body::WireBody,
    rate_limit::{RateLimitConfig, RateLimitInfo, RateLimiter},
    request::{RequestSpec, RequestSpecBuilder, ResponseShape, DEFAULT_RETRY_BUDGET},
    response::Payload,
    retry::{Backoff, RetryExecutor, RetryExecutorBuilder, RetryPredicate},
    url_builder::UrlBuilder,
    Error, Response, Result,
};
use http::{header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// An HTTP client bound to one destination.
///
/// Cloning is cheap; clones share the connection pool, the rate limiter and
/// the configuration, so a clone can be moved into background work.
///
/// # Examples
///
/// ```no_run
/// use outcall::{Backoff, Client, ResponseShape};
/// use http::Method;
/// use serde::Deserialize;
/// use std::time::Duration;
///
/// #[derive(Deserialize)]
/// struct Board {
///     id: String,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), outcall::Error> {
/// let client = Client::builder()
///     .destination("boards")
///     .base_url("https://api.example.com/1")?
///     .default_api_key("app-key")
///     .timeout(Duration::from_secs(30))
///     .backoff(Backoff::Fixed(Duration::from_millis(250)))
///     .build()?;
///
/// let spec = client
///     .request(Method::GET, "/members/{id}/boards")
///     .path_var("id", "me")
///     .shape(ResponseShape::Collection)
///     .build()?;
///
/// let boards = client.fetch_many::<Board>(spec).await?;
/// for board in boards.data {
///     println!("{} ({})", board.name, board.id);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    destination: String,
    base_url: Url,
    default_headers: HeaderMap,
    url_builder: UrlBuilder,
    retry: RetryExecutor,
    rate_limiter: Option<Arc<RateLimiter>>,
    rate_limit_config: RateLimitConfig,
    retry_budget: u32,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("destination", &self.inner.destination)
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new `ClientBuilder`.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Name of the destination this client talks to.
    pub fn destination(&self) -> &str {
        &self.inner.destination
    }

    /// Base URL of the destination.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The rate limiter guarding this destination, if any.
    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.inner.rate_limiter.as_ref()
    }

    /// Starts describing a call to this destination.
    ///
    /// The builder is pre-filled with the destination base URL and the
    /// client's default retry budget.
    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestSpecBuilder {
        RequestSpec::builder(method, path)
            .base_url(self.inner.base_url.as_str())
            .retry_budget(self.inner.retry_budget)
    }

    /// Resolves `spec` to the URL it would be sent to, credentials included.
    pub fn url_for(&self, spec: &RequestSpec) -> Result<Url> {
        self.inner.url_builder.build(spec)
    }

    /// Runs `spec`, deserializing the body according to its shape.
    pub async fn execute<T>(&self, spec: RequestSpec) -> Result<Response<Payload<T>>>
    where
        T: DeserializeOwned,
    {
        self.execute_with_cancel(spec, &CancellationToken::new())
            .await
    }

    /// Runs `spec`, giving up with [`Error::Cancelled`] once `cancel` fires.
    pub async fn execute_with_cancel<T>(
        &self,
        spec: RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<Response<Payload<T>>>
    where
        T: DeserializeOwned,
    {
        match spec.shape() {
            ResponseShape::Single => Ok(self
                .call::<T>(&spec, cancel)
                .await?
                .map(Payload::Single)),
            ResponseShape::Collection => Ok(self
                .call::<Vec<T>>(&spec, cancel)
                .await?
                .map(Payload::Collection)),
        }
    }

    /// Runs a request expecting a single record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the request expects a collection.
    pub async fn fetch_one<T>(&self, spec: RequestSpec) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        if spec.shape() != ResponseShape::Single {
            return Err(Error::ConfigurationError(
                "fetch_one requires a single-record request".to_string(),
            ));
        }
        self.call(&spec, &CancellationToken::new()).await
    }

    /// Runs a request expecting a collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the request expects a single record.
    pub async fn fetch_many<T>(&self, spec: RequestSpec) -> Result<Response<Vec<T>>>
    where
        T: DeserializeOwned,
    {
        if spec.shape() != ResponseShape::Collection {
            return Err(Error::ConfigurationError(
                "fetch_many requires a collection request".to_string(),
            ));
        }
        self.call(&spec, &CancellationToken::new()).await
    }

    /// Runs all attempts of one call, deserializing the body as `T`.
    async fn call<T>(&self, spec: &RequestSpec, cancel: &CancellationToken) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let url = self.inner.url_builder.build(spec)?;
        let url = &url;
        let start_time = Instant::now();

        self.inner
            .retry
            .execute(
                self.inner.rate_limiter.as_deref(),
                spec.retry_budget(),
                cancel,
                |attempt| async move {
                    let response = self.execute_request(spec, url, attempt).await?;
                    self.parse_response(response, start_time.elapsed(), attempt)
                        .await
                },
            )
            .await
    }

    /// Executes a single attempt.
    async fn execute_request(
        &self,
        spec: &RequestSpec,
        url: &Url,
        attempt: u32,
    ) -> Result<reqwest::Response> {
        tracing::debug!(
            destination = %self.inner.destination,
            method = %spec.method(),
            path = %url.path(),
            attempt = attempt,
            "Executing HTTP request"
        );

        let mut request = self
            .inner
            .http_client
            .request(spec.method().clone(), url.clone());

        for (name, value) in &self.inner.default_headers {
            request = request.header(name, value);
        }
        for (name, value) in spec.headers() {
            request = request.header(name, value);
        }
        if let Some(token) = &spec.credentials().bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = self.inner.timeout {
            request = request.timeout(timeout);
        }

        request = match spec.body() {
            Some(WireBody::Json(value)) => request.json(value),
            Some(WireBody::Form(fields)) => request.form(fields),
            Some(WireBody::Text { content_type, body }) => request
                .header(CONTENT_TYPE, content_type.as_str())
                .body(body.clone()),
            None => request,
        };

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout
            } else {
                Error::Network(e)
            }
        })
    }

    /// Checks the status and deserializes the body.
    async fn parse_response<T>(
        &self,
        response: reqwest::Response,
        latency: Duration,
        attempts: u32,
    ) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        let headers = response.headers().clone();

        tracing::info!(
            destination = %self.inner.destination,
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            attempts = attempts,
            "Received HTTP response"
        );

        if !status.is_success() {
            let raw_response = response.text().await.unwrap_or_default();

            let rate_limit_info = if self.inner.rate_limit_config.enabled {
                Some(RateLimitInfo::from_headers(&headers)).filter(RateLimitInfo::is_rate_limited)
            } else {
                None
            };

            if status.is_client_error() {
                tracing::error!(
                    status = status.as_u16(),
                    response = %raw_response,
                    "Client error (4xx)"
                );
            } else if status.is_server_error() {
                tracing::warn!(
                    status = status.as_u16(),
                    response = %raw_response,
                    "Server error (5xx)"
                );
            }

            return Err(Error::HttpError {
                status,
                raw_response,
                headers,
                rate_limit_info,
            });
        }

        let raw_body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout
            } else {
                Error::Network(e)
            }
        })?;

        match serde_json::from_str::<T>(&raw_body) {
            Ok(data) => Ok(Response::new(
                data, raw_body, status, headers, latency, attempts,
            )),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_response = %raw_body,
                    "Failed to deserialize response"
                );

                Err(Error::DeserializationFailed {
                    raw_response: raw_body,
                    serde_error: e.to_string(),
                    status,
                })
            }
        }
    }

    /// Makes a GET request expecting a single record.
    pub async fn get<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let spec = self.request(Method::GET, path).build()?;
        self.fetch_one(spec).await
    }

    /// Makes a POST request with a JSON body.
    pub async fn post<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        self.send_json(Method::POST, path, body).await
    }

    /// Makes a PUT request with a JSON body.
    pub async fn put<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        self.send_json(Method::PUT, path, body).await
    }

    /// Makes a PATCH request with a JSON body.
    pub async fn patch<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        self.send_json(Method::PATCH, path, body).await
    }

    async fn send_json<Req, Res>(
        &self,
        method: Method,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let spec = self.request(method, path).json_body(body)?.build()?;
        self.fetch_one(spec).await
    }
}

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    destination: Option<String>,
    base_url: Option<Url>,
    default_headers: HeaderMap,
    url_builder: UrlBuilder,
    retry: RetryExecutorBuilder,
    rate_limiter: Option<Arc<RateLimiter>>,
    rate_limit_config: RateLimitConfig,
    retry_budget: u32,
    timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            destination: None,
            base_url: None,
            default_headers: HeaderMap::new(),
            url_builder: UrlBuilder::new(),
            retry: RetryExecutor::builder(),
            rate_limiter: None,
            rate_limit_config: RateLimitConfig::default(),
            retry_budget: DEFAULT_RETRY_BUDGET,
            timeout: None,
        }
    }

    /// Names the destination. Defaults to the base URL's host.
    pub fn destination(mut self, name: impl Into<String>) -> Self {
        self.destination = Some(name.into());
        self
    }

    /// Sets the destination base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a header sent with every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the query parameter carrying the API key. Defaults to `key`.
    pub fn api_key_param(mut self, name: impl Into<String>) -> Self {
        self.url_builder = self.url_builder.api_key_param(name);
        self
    }

    /// Sets the API key sent when a request carries none.
    pub fn default_api_key(mut self, key: impl Into<String>) -> Self {
        self.url_builder = self.url_builder.default_api_key(key);
        self
    }

    /// Guards every attempt with `limiter`.
    ///
    /// Pass the same limiter to every client of a destination so that they
    /// share one window.
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Sets the default retry budget for requests built with
    /// [`Client::request`].
    pub fn retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Sets the delay between attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.retry = self.retry.backoff(backoff);
        self
    }

    /// Overrides which failures are retried.
    pub fn retry_predicate(mut self, predicate: impl RetryPredicate + 'static) -> Self {
        self.retry = self.retry.predicate(predicate);
        self
    }

    /// Sets the per-attempt transport timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets how upstream rate limit headers are handled.
    pub fn rate_limit_config(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit_config = config;
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided, the retry budget is zero,
    /// or the HTTP client cannot be created.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::ConfigurationError("Base URL is required".to_string()))?;

        if self.retry_budget == 0 {
            return Err(Error::ConfigurationError(
                "Retry budget must be at least 1".to_string(),
            ));
        }

        let destination = self
            .destination
            .or_else(|| base_url.host_str().map(str::to_string))
            .unwrap_or_else(|| base_url.to_string());

        let http_client = reqwest::Client::builder().build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        let retry = self
            .retry
            .rate_limit_config(self.rate_limit_config.clone())
            .build();

        Ok(Client {
            inner: Arc::new(ClientInner {
                http_client,
                destination,
                base_url,
                default_headers: self.default_headers,
                url_builder: self.url_builder,
                retry,
                rate_limiter: self.rate_limiter,
                rate_limit_config: self.rate_limit_config,
                retry_budget: self.retry_budget,
                timeout: self.timeout,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
