//! Example demonstrating local and upstream rate limiting.
//!
//! This example shows how to:
//! - Share one fixed-window limiter between clients of a destination
//! - Bound the number of callers waiting for a window
//! - Respect `Retry-After` and `X-RateLimit-*` headers sent by a destination
//! - Read rate limit information from errors
//!
//! Run with: `cargo run --example rate_limiting`

use outcall::rate_limit::{RateLimitConfig, RateLimiter, RateLimiters};
use outcall::{Backoff, Client, Error};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("outcall=debug")
        .init();

    println!("=== Example 1: Local admission control ===");
    println!("Three calls per second, at most two callers waiting.\n");

    let limiters = RateLimiters::new();
    let limiter = limiters.get_or_insert_with("httpbin", || {
        RateLimiter::new("httpbin", 3, Duration::from_secs(1), 2)
    });

    let client = Client::builder()
        .destination("httpbin")
        .base_url("https://httpbin.org")?
        .rate_limiter(Arc::clone(&limiter))
        .build()?;

    let mut calls = Vec::new();
    for n in 0..6 {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = client.get::<serde_json::Value>("/get").await;
            (n, started.elapsed(), result.map(|r| r.status))
        }));
    }
    for call in calls {
        let (n, elapsed, result) = call.await?;
        match result {
            Ok(status) => println!("call {} -> {} after {:?}", n, status, elapsed),
            Err(e) => println!("call {} -> {} after {:?}", n, e, elapsed),
        }
    }
    println!();

    println!("=== Example 2: Upstream hints ===");
    println!("A Retry-After from the destination replaces the local backoff,");
    println!("capped by max_wait.\n");

    let client = Client::builder()
        .base_url("https://httpbin.org")?
        .retry_budget(2)
        .backoff(Backoff::Exponential {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: true,
        })
        .rate_limit_config(
            RateLimitConfig::builder()
                .max_wait(Duration::from_secs(2))
                .respect_retry_after(true)
                .build(),
        )
        .build()?;

    match client.get::<serde_json::Value>("/status/429").await {
        Ok(_) => println!("Unexpected success"),
        Err(e) => {
            println!("Error: {}", e);

            let last = match &e {
                Error::RetryExhausted { last_error, .. } => last_error.as_ref(),
                other => other,
            };
            if let Some(info) = last.rate_limit_info() {
                println!("\nRate limit details:");
                if let Some(retry_after) = info.retry_after {
                    println!("  Retry after: {:?}", retry_after);
                }
                if let Some(remaining) = info.remaining {
                    println!("  Remaining: {}", remaining);
                }
                if let Some(delay) = last.rate_limit_delay(Duration::from_secs(10)) {
                    println!("  Recommended delay: {:?}", delay);
                }
            } else {
                println!("No rate limit information available");
            }

            if let Some(status) = e.status() {
                println!("  Status code: {}", status);
            }
        }
    }
    println!();

    println!("=== Example 3: Ignoring upstream hints ===");
    let _client = Client::builder()
        .base_url("https://httpbin.org")?
        .rate_limit_config(RateLimitConfig::disabled())
        .build()?;
    println!("429 responses are now retried on the local backoff only.");

    Ok(())
}
