//! Example: offloading calls to background executors.
//!
//! This example shows how to:
//! - Load destinations and executors from TOML
//! - Submit work to the `queued` executor and the `immediate` executor
//! - Cancel work that has not started yet
//! - Shut the executors down cleanly
//!
//! Run with: `cargo run --example background_work`

use http::Method;
use outcall::config::IntegrationConfig;
use outcall::executor::{WorkItem, IMMEDIATE, QUEUED};
use outcall::rate_limit::RateLimiters;
use serde::Deserialize;

const CONFIG: &str = r#"
[destinations.placeholder]
base_url = "https://jsonplaceholder.typicode.com"
retry_budget = 3
rate_limit = { limit = 5, window_ms = 1000, queue_depth = 16 }

[destinations.placeholder.backoff]
kind = "exponential"
initial_delay_ms = 100
max_delay_ms = 2000
jitter = true

[executors]
queue_capacity = 32
policy = "block"
"#;

#[derive(Debug, Deserialize)]
struct Todo {
    id: u32,
    title: String,
    completed: bool,
}

#[tokio::main]
async fn main() -> Result<(), outcall::Error> {
    tracing_subscriber::fmt()
        .with_env_filter("outcall=debug,background_work=info")
        .init();

    let config = IntegrationConfig::from_toml_str(CONFIG)?;
    let limiters = RateLimiters::new();
    let client = config.client_for("placeholder", &limiters)?;
    let registry = config.executor_registry()?;

    // Queued work runs one item at a time, in submission order.
    for id in 1..=5 {
        let client = client.clone();
        let item = WorkItem::new(move |ctx, cancel| async move {
            let spec = client
                .request(Method::GET, "/todos/{id}")
                .path_var("id", id.to_string())
                .build()?;
            let todo = client
                .execute_with_cancel::<Todo>(spec, &cancel)
                .await?
                .data
                .into_single()
                .ok_or("expected a single todo")?;
            println!(
                "[{}] todo {} {:?} done={}",
                ctx.task_id(),
                todo.id,
                todo.title,
                todo.completed
            );
            Ok(())
        })
        .labeled(format!("fetch-todo-{}", id));

        let handle = registry.submit(QUEUED, item).await?;
        if id == 5 {
            // Changed our mind about the last one.
            handle.cancel();
        }
    }

    // Immediate work starts right away; failures are only logged.
    registry
        .submit(
            IMMEDIATE,
            WorkItem::new(|_, _| async { Err("audit sink unavailable".into()) })
                .labeled("audit"),
        )
        .await?;

    registry.shutdown_all().await;
    Ok(())
}
