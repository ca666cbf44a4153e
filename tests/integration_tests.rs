//! Integration tests using wiremock to simulate destinations.

use http::Method;
use outcall::rate_limit::{RateLimitConfig, RateLimiter};
use outcall::{
    Backoff, BodyProcessors, Client, Error, Payload, RequestSpec, ResponseShape, WireBody,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
struct Card {
    id: u32,
    name: String,
}

fn card(id: u32) -> Card {
    Card {
        id,
        name: format!("card-{}", id),
    }
}

fn client(server: &MockServer) -> Client {
    Client::builder()
        .destination("tracker")
        .base_url(server.uri())
        .unwrap()
        .backoff(Backoff::Fixed(Duration::from_millis(10)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_get_with_api_key_and_path_var() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/members/42"))
        .and(query_param("key", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(card(42)))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .default_api_key("abc")
        .build()
        .unwrap();

    let spec = client
        .request(Method::GET, "/members/{id}")
        .path_var("id", "42")
        .build()
        .unwrap();
    let response = client.fetch_one::<Card>(spec).await.unwrap();

    assert_eq!(response.data, card(42));
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert!(!response.was_retried());
}

#[tokio::test]
async fn test_post_json_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/cards"))
        .and(header("content-type", "application/json"))
        .and(body_json(card(0)))
        .respond_with(ResponseTemplate::new(201).set_body_json(card(7)))
        .mount(&server)
        .await;

    let response = client(&server)
        .post::<Card, Card>("/cards", &card(0))
        .await
        .unwrap();

    assert_eq!(response.data, card(7));
    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn test_processed_form_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/cards/7/comments"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("text=looks+good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(card(7)))
        .expect(1)
        .mount(&server)
        .await;

    struct Comment(&'static str);
    let mut processors = BodyProcessors::new();
    processors.register(|comment: &Comment| Ok(WireBody::form([("text", comment.0)])));

    let client = client(&server);
    let spec = client
        .request(Method::POST, "/cards/{id}/comments")
        .path_var("id", "7")
        .processed_body(&processors, &Comment("looks good"))
        .unwrap()
        .build()
        .unwrap();

    client.fetch_one::<Card>(spec).await.unwrap();
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cards/1"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not found"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server).get::<Card>("/cards/1").await;

    match result {
        Err(Error::HttpError {
            status,
            raw_response,
            ..
        }) => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(raw_response, "Not found");
        }
        _ => panic!("Expected HttpError, got {:?}", result),
    }
}

#[tokio::test]
async fn test_deserialization_failure_is_permanent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cards/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server).get::<Card>("/cards/1").await;

    match result {
        Err(Error::DeserializationFailed {
            raw_response,
            status,
            ..
        }) => {
            assert_eq!(raw_response, "not json");
            assert_eq!(status.as_u16(), 200);
        }
        _ => panic!("Expected DeserializationFailed, got {:?}", result),
    }
}

#[tokio::test]
async fn test_retry_on_5xx_then_success() {
    let server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // First two requests fail with 503, third succeeds
    Mock::given(method("GET"))
        .and(path("/cards/3"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                ResponseTemplate::new(503).set_body_string("Unavailable")
            } else {
                ResponseTemplate::new(200).set_body_json(card(3))
            }
        })
        .mount(&server)
        .await;

    let response = client(&server).get::<Card>("/cards/3").await.unwrap();

    assert_eq!(response.data, card(3));
    assert_eq!(response.attempts, 3);
    assert!(response.was_retried());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_budget_exhaustion() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cards/3"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Server error"))
        .expect(3)
        .mount(&server)
        .await;

    let result = client(&server).get::<Card>("/cards/3").await;

    match result {
        Err(Error::RetryExhausted {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last_error.status().map(|s| s.as_u16()), Some(500));
        }
        _ => panic!("Expected RetryExhausted, got {:?}", result),
    }
}

#[tokio::test]
async fn test_per_request_budget_overrides_default() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cards"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let spec = client
        .request(Method::GET, "/cards")
        .retry_budget(1)
        .build()
        .unwrap();
    let result = client.fetch_one::<Card>(spec).await;

    assert!(matches!(
        result,
        Err(Error::RetryExhausted { attempts: 1, .. })
    ));
}

#[tokio::test]
async fn test_collection_shape() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/boards/b1/cards"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![card(1), card(2)]))
        .mount(&server)
        .await;

    let client = client(&server);
    let spec = client
        .request(Method::GET, "/boards/{board}/cards")
        .path_var("board", "b1")
        .shape(ResponseShape::Collection)
        .build()
        .unwrap();

    let response = client.execute::<Card>(spec.clone()).await.unwrap();
    assert_eq!(response.data, Payload::Collection(vec![card(1), card(2)]));

    let result = client.fetch_one::<Card>(spec).await;
    assert!(matches!(result, Err(Error::ConfigurationError(_))));
}

#[tokio::test]
async fn test_single_shape_rejects_array() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cards/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![card(1)]))
        .mount(&server)
        .await;

    let client = client(&server);
    let spec = client.request(Method::GET, "/cards/1").build().unwrap();
    let result = client.execute::<Card>(spec).await;

    assert!(matches!(result, Err(Error::DeserializationFailed { .. })));
}

#[tokio::test]
async fn test_bearer_token_and_default_headers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer user-token"))
        .and(header("x-client", "outcall-tests"))
        .and(header("x-trace", "t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(card(1)))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .default_header("X-Client", "outcall-tests")
        .unwrap()
        .build()
        .unwrap();

    let spec = client
        .request(Method::GET, "/me")
        .bearer_token("user-token")
        .header("X-Trace", "t-1")
        .unwrap()
        .build()
        .unwrap();
    client.fetch_one::<Card>(spec).await.unwrap();
}

#[tokio::test]
async fn test_explicit_query_overrides_embedded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("a", "2"))
        .and(query_param("b", "x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(card(1)))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let spec = client
        .request(Method::GET, "/search?a=1&b=x")
        .query("a", "2")
        .build()
        .unwrap();

    // The frozen spec resolves the same way on every call.
    client.fetch_one::<Card>(spec.clone()).await.unwrap();
    client.fetch_one::<Card>(spec).await.unwrap();
}

#[tokio::test]
async fn test_all_http_methods() {
    let server = MockServer::start().await;

    for verb in ["GET", "POST", "PUT", "PATCH", "DELETE"] {
        Mock::given(method(verb))
            .and(path("/cards/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(card(5)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let client = client(&server);
    client.get::<Card>("/cards/5").await.unwrap();
    client.post::<_, Card>("/cards/5", &card(5)).await.unwrap();
    client.put::<_, Card>("/cards/5", &card(5)).await.unwrap();
    client.patch::<_, Card>("/cards/5", &card(5)).await.unwrap();

    let spec = client.request(Method::DELETE, "/cards/5").build().unwrap();
    client.fetch_one::<Card>(spec).await.unwrap();
}

#[tokio::test]
async fn test_spec_without_client_defaults() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cards/9"))
        .and(query_param("token", "explicit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(card(9)))
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .api_key_param("token")
        .build()
        .unwrap();

    let spec = RequestSpec::builder(Method::GET, "/cards/9")
        .base_url(server.uri())
        .api_key("explicit")
        .build()
        .unwrap();
    let response = client.fetch_one::<Card>(spec).await.unwrap();
    assert_eq!(response.data.id, 9);
}

#[tokio::test]
async fn test_retry_after_replaces_backoff() {
    let server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // First request returns 429 with Retry-After, second succeeds
    Mock::given(method("GET"))
        .and(path("/cards/1"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "1")
                    .insert_header("x-ratelimit-remaining", "0")
                    .set_body_string("Rate limited")
            } else {
                ResponseTemplate::new(200).set_body_json(card(1))
            }
        })
        .mount(&server)
        .await;

    let start = std::time::Instant::now();
    let response = client(&server).get::<Card>("/cards/1").await.unwrap();

    assert_eq!(response.attempts, 2);
    // Should have waited approximately 1 second for the destination
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_reset_header_replaces_backoff() {
    let server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // Only a reset timestamp, no Retry-After
    let reset = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 2;

    Mock::given(method("GET"))
        .and(path("/cards/1"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(429)
                    .insert_header("x-ratelimit-reset", reset.to_string().as_str())
                    .set_body_string("Rate limited")
            } else {
                ResponseTemplate::new(200).set_body_json(card(1))
            }
        })
        .mount(&server)
        .await;

    let start = std::time::Instant::now();
    let response = client(&server).get::<Card>("/cards/1").await.unwrap();

    assert_eq!(response.attempts, 2);
    // The reset is at least one full second away; the 10ms backoff is not used
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_retry_after_ignored_when_disabled() {
    let server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .and(path("/cards/1"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(429).insert_header("retry-after", "5")
            } else {
                ResponseTemplate::new(200).set_body_json(card(1))
            }
        })
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .backoff(Backoff::Fixed(Duration::from_millis(10)))
        .rate_limit_config(RateLimitConfig::disabled())
        .build()
        .unwrap();

    let start = std::time::Instant::now();
    let response = client.get::<Card>("/cards/1").await.unwrap();

    assert_eq!(response.attempts, 2);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_retry_after_is_capped_by_max_wait() {
    let server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .and(path("/cards/1"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(429).insert_header("retry-after", "60")
            } else {
                ResponseTemplate::new(200).set_body_json(card(1))
            }
        })
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .rate_limit_config(
            RateLimitConfig::builder()
                .max_wait(Duration::from_millis(200))
                .build(),
        )
        .build()
        .unwrap();

    let start = std::time::Instant::now();
    client.get::<Card>("/cards/1").await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_local_limiter_throttles_when_queue_is_full() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cards/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(card(1)))
        .expect(2)
        .mount(&server)
        .await;

    let limiter = Arc::new(RateLimiter::new("tracker", 2, Duration::from_secs(60), 0));
    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .rate_limiter(Arc::clone(&limiter))
        .retry_budget(1)
        .build()
        .unwrap();

    client.get::<Card>("/cards/1").await.unwrap();
    client.get::<Card>("/cards/1").await.unwrap();

    let result = client.get::<Card>("/cards/1").await;
    match result {
        Err(Error::RetryExhausted { last_error, .. }) => {
            assert!(matches!(*last_error, Error::Throttled { ref destination } if destination == "tracker"));
        }
        _ => panic!("Expected a throttled call, got {:?}", result),
    }
}

#[tokio::test]
async fn test_transport_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(card(1))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .timeout(Duration::from_millis(50))
        .retry_budget(1)
        .build()
        .unwrap();

    let result = client.get::<Card>("/slow").await;
    match result {
        Err(Error::RetryExhausted { last_error, .. }) => {
            assert!(matches!(*last_error, Error::Timeout));
        }
        _ => panic!("Expected a timed out call, got {:?}", result),
    }
}

#[tokio::test]
async fn test_cancel_in_flight_call() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(card(1))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = client(&server);
    let spec = client.request(Method::GET, "/slow").build().unwrap();
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let start = std::time::Instant::now();
    let result = client.execute_with_cancel::<Card>(spec, &cancel).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(2));
}
