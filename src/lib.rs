//! # Outcall - outbound integration core
//!
//! Outcall is the layer an application uses to talk to third-party HTTP APIs.
//! It describes each call as an immutable [`RequestSpec`], resolves it to a
//! URL with credentials through a [`UrlBuilder`], keeps every destination
//! under its request-rate limit, retries transient failures within a fixed
//! attempt budget, and runs deferred work on named background executors.
//!
//! ## Quick Start
//!
//! ```no_run
//! use outcall::{Client, ResponseShape};
//! use http::Method;
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Member {
//!     id: String,
//!     username: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), outcall::Error> {
//!     let client = Client::builder()
//!         .destination("tracker")
//!         .base_url("https://api.tracker.example/1")?
//!         .default_api_key("app-key")
//!         .timeout(Duration::from_secs(30))
//!         .build()?;
//!
//!     // GET https://api.tracker.example/1/members/me?token=...&key=app-key
//!     let spec = client
//!         .request(Method::GET, "/members/{id}")
//!         .path_var("id", "me")
//!         .query("token", "user-token")
//!         .build()?;
//!
//!     let member = client.fetch_one::<Member>(spec).await?;
//!     println!("{} ({}) after {} attempt(s)", member.data.username, member.data.id, member.attempts);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Frozen request descriptions** - path templates, query parameters, headers, body and retry budget validated at build time
//! - **Credential injection** - API key as a query parameter or a bearer token, with per-destination defaults
//! - **Per-destination rate limiting** - a fixed-window limiter shared by every caller of a destination
//! - **Bounded retries** - transient failures are retried with a configurable backoff, permanent ones are not
//! - **Upstream hints** - `Retry-After` and `X-RateLimit-*` headers override the local backoff
//! - **Background executors** - a bounded FIFO queue and a fire-and-forget executor, resolved by name
//! - **Adapters** - a project tracker, a hosted-checkout payment gateway and a redirect checkout
//! - **Declarative setup** - destinations and executors loaded from TOML
//!
//! ## Error Handling
//!
//! Every failure is an [`Error`]. [`Error::classify`] tells transient failures
//! from permanent ones; the raw upstream body is kept for debugging:
//!
//! ```no_run
//! use outcall::{Client, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().base_url("https://api.example.com")?.build()?;
//! match client.get::<serde_json::Value>("/boards/abc").await {
//!     Ok(response) => println!("Board: {}", response.data),
//!     Err(Error::RetryExhausted { attempts, last_error }) => {
//!         eprintln!("Gave up after {} attempts: {}", attempts, last_error);
//!     }
//!     Err(Error::HttpError { status, raw_response, .. }) => {
//!         eprintln!("HTTP error {}: {}", status, raw_response);
//!     }
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Background Work
//!
//! ```no_run
//! use outcall::config::IntegrationConfig;
//! use outcall::executor::{WorkItem, QUEUED};
//!
//! # async fn example() -> Result<(), outcall::Error> {
//! let config = IntegrationConfig::from_path("integrations.toml")?;
//! let registry = config.executor_registry()?;
//!
//! registry
//!     .submit(QUEUED, WorkItem::new(|_ctx, _cancel| async { Ok(()) }).labeled("nightly-sync"))
//!     .await?;
//!
//! registry.shutdown_all().await;
//! # Ok(())
//! # }
//! ```

pub mod body;
mod client;
pub mod config;
pub mod credentials;
mod error;
pub mod executor;
pub mod integrations;
pub mod rate_limit;
mod request;
mod response;
pub mod retry;
mod url_builder;

pub use body::{BodyProcessor, BodyProcessors, WireBody};
pub use client::{Client, ClientBuilder};
pub use error::{BoxError, Error, FailureClass, Result};
pub use request::{
    Credentials, QueryParams, RequestSpec, RequestSpecBuilder, ResponseShape, DEFAULT_RETRY_BUDGET,
};
pub use response::{Payload, Response};
pub use retry::{Backoff, RetryExecutor, RetryPredicate};
pub use url_builder::{UrlBuilder, DEFAULT_API_KEY_PARAM};
