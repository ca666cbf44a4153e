//! Immutable descriptions of a single outbound call.
//!
//! A [`RequestSpec`] is produced in one step by [`RequestSpecBuilder::build`]
//! and cannot be changed afterwards. Validation that can fail (missing
//! destination, unresolved path placeholders, bad headers) happens there, so a
//! `RequestSpec` that exists is always resolvable by the
//! [`UrlBuilder`](crate::UrlBuilder).

use crate::body::{BodyProcessors, WireBody};
use crate::url_builder;
use crate::{Error, Result};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Default number of attempts for a call when nothing else is configured.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// The shape the response body is expected to deserialize into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseShape {
    /// A single JSON object.
    #[default]
    Single,
    /// A JSON array of objects.
    Collection,
}

/// Credentials attached to one call.
///
/// The API key is sent as a query parameter (see
/// [`UrlBuilder`](crate::UrlBuilder)); the bearer token as an `Authorization`
/// header.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// API key overriding the destination default.
    pub api_key: Option<String>,
    /// Bearer token for the `Authorization` header.
    pub bearer_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Query parameters with case-insensitive keys.
///
/// Insertion order is preserved. Inserting a key that is already present
/// (ignoring ASCII case) replaces the value in place and adopts the new
/// spelling of the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, String)>,
}

impl QueryParams {
    /// Creates an empty set of parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an `application/x-www-form-urlencoded` query string.
    ///
    /// Later occurrences of a key overwrite earlier ones.
    pub fn parse(query: &str) -> Self {
        let mut params = Self::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.insert(key, value);
        }
        params
    }

    /// Inserts or replaces a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&key))
        {
            Some(entry) => *entry = (key, value),
            None => self.entries.push((key, value)),
        }
    }

    /// Looks up a parameter, ignoring the case of the key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Overlays `other` on top of `self`; `other` wins on collisions.
    pub fn extend(&mut self, other: &QueryParams) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }

    /// Iterates over the parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An immutable description of one outbound call.
///
/// # Examples
///
/// ```
/// use outcall::{RequestSpec, ResponseShape};
/// use http::Method;
///
/// let spec = RequestSpec::builder(Method::GET, "/members/{id}/boards")
///     .base_url("https://api.example.com")
///     .path_var("id", "42")
///     .query("fields", "name,url")
///     .shape(ResponseShape::Collection)
///     .retry_budget(5)
///     .build()
///     .unwrap();
///
/// assert_eq!(spec.retry_budget(), 5);
/// assert_eq!(spec.query().get("FIELDS"), Some("name,url"));
/// ```
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    base_url: Url,
    path: String,
    path_vars: BTreeMap<String, String>,
    query: QueryParams,
    headers: HeaderMap,
    body: Option<WireBody>,
    shape: ResponseShape,
    retry_budget: u32,
    credentials: Credentials,
}

impl RequestSpec {
    /// Starts describing a call with the given method and path template.
    pub fn builder(method: Method, path: impl Into<String>) -> RequestSpecBuilder {
        RequestSpecBuilder::new(method, path)
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The destination base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The path template, possibly containing `{name}` placeholders and an
    /// embedded query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Values for the path placeholders.
    pub fn path_vars(&self) -> &BTreeMap<String, String> {
        &self.path_vars
    }

    /// Explicit query parameters.
    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    /// Headers specific to this call.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The wire body, if any.
    pub fn body(&self) -> Option<&WireBody> {
        self.body.as_ref()
    }

    /// The expected response shape.
    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    /// The maximum number of attempts, always at least 1.
    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    /// Credentials for this call.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// Builder for [`RequestSpec`].
///
/// The builder is consumed by [`build`](Self::build); the resulting request is
/// frozen.
#[derive(Debug)]
pub struct RequestSpecBuilder {
    method: Method,
    base_url: Option<String>,
    path: String,
    path_vars: BTreeMap<String, String>,
    query: QueryParams,
    headers: HeaderMap,
    body: Option<WireBody>,
    shape: ResponseShape,
    retry_budget: u32,
    credentials: Credentials,
}

impl RequestSpecBuilder {
    /// Creates a builder with the given method and path template.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            base_url: None,
            path: path.into(),
            path_vars: BTreeMap::new(),
            query: QueryParams::new(),
            headers: HeaderMap::new(),
            body: None,
            shape: ResponseShape::Single,
            retry_budget: DEFAULT_RETRY_BUDGET,
            credentials: Credentials::default(),
        }
    }

    /// Sets the destination base URL. Parsed by `build`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the value substituted for `{name}` in the path.
    pub fn path_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_vars.insert(name.into(), value.into());
        self
    }

    /// Adds an explicit query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key, value);
        self
    }

    /// Adds several explicit query parameters.
    pub fn query_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in params {
            self.query.insert(key, value);
        }
        self
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sets an already-prepared wire body.
    pub fn body(mut self, body: WireBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Serializes `value` as a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`] if `value` cannot be serialized.
    pub fn json_body<T: Serialize>(self, value: &T) -> Result<Self> {
        Ok(self.body(WireBody::json(value)?))
    }

    /// Converts `value` to wire form through its registered transform.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BodyProcessing`] if no transform is registered for `T`
    /// or the transform fails.
    pub fn processed_body<T: Any>(self, processors: &BodyProcessors, value: &T) -> Result<Self> {
        Ok(self.body(processors.process(value)?))
    }

    /// Sets the expected response shape.
    pub fn shape(mut self, shape: ResponseShape) -> Self {
        self.shape = shape;
        self
    }

    /// Sets the maximum number of attempts. Must be at least 1.
    pub fn retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Overrides the destination's default API key for this call.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.credentials.api_key = Some(key.into());
        self
    }

    /// Sends this call with `Authorization: Bearer <token>`.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.credentials.bearer_token = Some(token.into());
        self
    }

    /// Freezes the description.
    ///
    /// # Errors
    ///
    /// - [`Error::ConfigurationError`] if no base URL was given or the retry
    ///   budget is zero.
    /// - [`Error::InvalidUrl`] if the base URL does not parse.
    /// - [`Error::TemplateError`] if a placeholder has no path variable.
    pub fn build(self) -> Result<RequestSpec> {
        let base_url = self
            .base_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                Error::ConfigurationError("Destination base URL is required".to_string())
            })?;
        let base_url = Url::parse(&base_url)?;

        if self.retry_budget == 0 {
            return Err(Error::ConfigurationError(
                "Retry budget must be at least 1".to_string(),
            ));
        }

        for placeholder in url_builder::placeholders(&self.path)? {
            if !self.path_vars.contains_key(placeholder) {
                return Err(Error::TemplateError {
                    template: self.path.clone(),
                    placeholder: placeholder.to_string(),
                });
            }
        }

        Ok(RequestSpec {
            method: self.method,
            base_url,
            path: self.path,
            path_vars: self.path_vars,
            query: self.query,
            headers: self.headers,
            body: self.body,
            shape: self.shape,
            retry_budget: self.retry_budget,
            credentials: self.credentials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params_are_case_insensitive() {
        let mut params = QueryParams::parse("Key=old&fields=all");
        params.insert("KEY", "new");

        assert_eq!(params.len(), 2);
        assert_eq!(params.get("key"), Some("new"));
        let keys: Vec<_> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["KEY", "fields"]);
    }

    #[test]
    fn test_missing_base_url_is_configuration_error() {
        let result = RequestSpec::builder(Method::GET, "/members/me").build();
        assert!(matches!(result, Err(Error::ConfigurationError(_))));

        for blank in ["", "   "] {
            let result = RequestSpec::builder(Method::GET, "/members/me")
                .base_url(blank)
                .build();
            assert!(matches!(result, Err(Error::ConfigurationError(_))));
        }
    }

    #[test]
    fn test_unresolved_placeholder_fails_at_build() {
        let result = RequestSpec::builder(Method::GET, "/boards/{board}/cards/{card}")
            .base_url("https://api.example.com")
            .path_var("board", "b1")
            .build();

        match result {
            Err(Error::TemplateError { placeholder, .. }) => assert_eq!(placeholder, "card"),
            other => panic!("Expected TemplateError, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_retry_budget_rejected() {
        let result = RequestSpec::builder(Method::GET, "/")
            .base_url("https://api.example.com")
            .retry_budget(0)
            .build();
        assert!(matches!(result, Err(Error::ConfigurationError(_))));
    }

    #[test]
    fn test_credentials_are_redacted_in_debug() {
        let spec = RequestSpec::builder(Method::GET, "/")
            .base_url("https://api.example.com")
            .api_key("secret-key")
            .bearer_token("secret-token")
            .build()
            .unwrap();

        let debug = format!("{:?}", spec);
        assert!(!debug.contains("secret-key"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let result = RequestSpec::builder(Method::GET, "/").header("bad header", "value");
        assert!(matches!(result, Err(Error::ConfigurationError(_))));
    }
}
