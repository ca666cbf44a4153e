//! Resolution of a [`RequestSpec`] into the final request URL.

use crate::request::{QueryParams, RequestSpec};
use crate::{Error, Result};
use std::collections::BTreeMap;
use url::Url;

/// Query parameter carrying the API key unless configured otherwise.
pub const DEFAULT_API_KEY_PARAM: &str = "key";

/// Turns a [`RequestSpec`] into a URL.
///
/// The builder holds the destination-level credential configuration: the name
/// of the API-key query parameter and the default key used when a request does
/// not carry its own. It has no other state, and [`build`](Self::build) is a
/// pure function of the builder and the request.
///
/// Resolution happens in this order:
///
/// 1. every `{name}` in the path is replaced by the percent-encoded path
///    variable,
/// 2. a query string embedded in the path is parsed into case-insensitive
///    parameters,
/// 3. the explicit query parameters are overlaid (explicit wins),
/// 4. the API-key parameter is set from the request credentials, or else from
///    the default key.
///
/// Parameters are serialized in insertion order.
///
/// # Examples
///
/// ```
/// use outcall::{RequestSpec, UrlBuilder};
/// use http::Method;
///
/// let spec = RequestSpec::builder(Method::GET, "/members/{id}")
///     .base_url("https://api.example.com")
///     .path_var("id", "42")
///     .query("key", "abc")
///     .build()
///     .unwrap();
///
/// let url = UrlBuilder::new().build(&spec).unwrap();
/// assert_eq!(url.as_str(), "https://api.example.com/members/42?key=abc");
/// ```
#[derive(Clone, Default)]
pub struct UrlBuilder {
    api_key_param: Option<String>,
    default_api_key: Option<String>,
}

impl std::fmt::Debug for UrlBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlBuilder")
            .field("api_key_param", &self.api_key_param_name())
            .field("default_api_key", &self.default_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl UrlBuilder {
    /// Creates a builder with no default API key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the API-key query parameter.
    pub fn api_key_param(mut self, name: impl Into<String>) -> Self {
        self.api_key_param = Some(name.into());
        self
    }

    /// Sets the API key used when a request carries none.
    pub fn default_api_key(mut self, key: impl Into<String>) -> Self {
        self.default_api_key = Some(key.into());
        self
    }

    fn api_key_param_name(&self) -> &str {
        self.api_key_param
            .as_deref()
            .unwrap_or(DEFAULT_API_KEY_PARAM)
    }

    /// Resolves `spec` into the URL to call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateError`] if a placeholder cannot be resolved and
    /// [`Error::InvalidUrl`] if the result is not a valid URL.
    pub fn build(&self, spec: &RequestSpec) -> Result<Url> {
        let resolved = substitute(spec.path(), spec.path_vars())?;
        let (path, embedded_query) = match resolved.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (resolved.as_str(), None),
        };

        let mut base = spec.base_url().clone();
        let mut params = base
            .query()
            .map(QueryParams::parse)
            .unwrap_or_default();
        base.set_query(None);
        base.set_fragment(None);

        if let Some(query) = embedded_query {
            params.extend(&QueryParams::parse(query));
        }
        params.extend(spec.query());

        let api_key = spec
            .credentials()
            .api_key
            .as_ref()
            .or(self.default_api_key.as_ref());
        if let Some(key) = api_key {
            params.insert(self.api_key_param_name(), key.as_str());
        }

        let mut url = join(&base, path)?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }
}

/// Appends `path` to `base`, keeping whatever path `base` already has.
fn join(base: &Url, path: &str) -> Result<Url> {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return Ok(base.clone());
    }
    let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path);
    Ok(Url::parse(&joined)?)
}

/// Lists the placeholder names in `template`, in order of appearance.
///
/// # Errors
///
/// Returns [`Error::TemplateError`] on an unterminated `{`.
pub(crate) fn placeholders(template: &str) -> Result<Vec<&str>> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| Error::TemplateError {
            template: template.to_string(),
            placeholder: after.to_string(),
        })?;
        names.push(&after[..close]);
        rest = &after[close + 1..];
    }
    Ok(names)
}

/// Replaces every `{name}` in `template` with the percent-encoded value of
/// `vars[name]`.
pub(crate) fn substitute(template: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| Error::TemplateError {
            template: template.to_string(),
            placeholder: after.to_string(),
        })?;
        let name = &after[..close];
        let value = vars.get(name).ok_or_else(|| Error::TemplateError {
            template: template.to_string(),
            placeholder: name.to_string(),
        })?;
        out.push_str(&urlencoding::encode(value));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
