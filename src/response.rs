//! Successful responses, with the exchange details kept alongside the data.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A response body deserialized according to the request's
/// [`ResponseShape`](crate::ResponseShape).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<T> {
    /// The destination returned a single record.
    Single(T),
    /// The destination returned a list of records.
    Collection(Vec<T>),
}

impl<T> Payload<T> {
    /// Returns the single record, or `None` for a collection.
    pub fn into_single(self) -> Option<T> {
        match self {
            Payload::Single(item) => Some(item),
            Payload::Collection(_) => None,
        }
    }

    /// Returns the records as a list; a single record becomes a list of one.
    pub fn into_collection(self) -> Vec<T> {
        match self {
            Payload::Single(item) => vec![item],
            Payload::Collection(items) => items,
        }
    }

    /// Returns `true` for [`Payload::Collection`].
    pub fn is_collection(&self) -> bool {
        matches!(self, Payload::Collection(_))
    }
}

/// A successful call.
///
/// # Examples
///
/// ```no_run
/// use outcall::Client;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Member {
///     id: String,
///     username: String,
/// }
///
/// # async fn example() -> Result<(), outcall::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let response = client.get::<Member>("/members/me").await?;
///
/// println!("Member: {}", response.data.username);
/// println!("Took {:?} over {} attempt(s)", response.latency, response.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The deserialized response data.
    pub data: T,

    /// The raw response body.
    pub raw_body: String,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Time from the first attempt to the successful response, including
    /// backoff and rate limiter waits.
    pub latency: Duration,

    /// Number of attempts made; `1` if the first attempt succeeded.
    pub attempts: u32,
}

impl<T> Response<T> {
    /// Creates a new `Response`.
    pub fn new(
        data: T,
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        latency: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            latency,
            attempts,
        }
    }

    /// Maps the data while keeping the exchange details.
    ///
    /// # Examples
    ///
    /// ```
    /// # use outcall::Response;
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = Response::new(
    ///     42,
    ///     "42".to_string(),
    ///     StatusCode::OK,
    ///     HeaderMap::new(),
    ///     Duration::from_millis(100),
    ///     1,
    /// );
    ///
    /// let string_response = response.map(|n| n.to_string());
    /// assert_eq!(string_response.data, "42");
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    /// Returns `true` if the call needed more than one attempt.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_conversions() {
        assert_eq!(Payload::Single(1).into_single(), Some(1));
        assert_eq!(Payload::Single(1).into_collection(), vec![1]);
        assert_eq!(Payload::Collection(vec![1, 2]).into_single(), None);
        assert!(Payload::Collection(Vec::<u8>::new()).is_collection());
    }

    #[test]
    fn test_was_retried() {
        let response = Response::new(
            (),
            String::new(),
            StatusCode::OK,
            HeaderMap::new(),
            Duration::ZERO,
            3,
        );
        assert!(response.was_retried());
        assert_eq!(response.header("x-missing"), None);
    }
}
