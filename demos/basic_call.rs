//! Basic example: describing calls with `RequestSpec` and running them.
//!
//! This example shows how to:
//! - Create a client for one destination
//! - Fill path placeholders and query parameters
//! - Fetch a single record and a collection
//! - Send a JSON body
//!
//! Run with: `cargo run --example basic_call`

use http::Method;
use outcall::{Client, Error, ResponseShape};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("outcall=debug,basic_call=info")
        .init();

    let client = Client::builder()
        .destination("placeholder")
        .base_url("https://jsonplaceholder.typicode.com")?
        .build()?;

    println!("=== Single record ===");
    let spec = client
        .request(Method::GET, "/posts/{id}")
        .path_var("id", "1")
        .build()?;
    println!("URL: {}", client.url_for(&spec)?);

    let response = client.fetch_one::<Post>(spec).await?;
    println!("Title: {}", response.data.title);
    println!("Latency: {:?}, attempts: {}", response.latency, response.attempts);
    println!();

    println!("=== Collection ===");
    let spec = client
        .request(Method::GET, "/users/{id}/posts")
        .path_var("id", "1")
        .query("_limit", "3")
        .shape(ResponseShape::Collection)
        .build()?;

    let posts = client.fetch_many::<Post>(spec).await?;
    for post in &posts.data {
        println!("#{} {}", post.id, post.title);
    }
    println!();

    println!("=== JSON body ===");
    let new_post = NewPost {
        title: "Weekly sync".to_string(),
        body: "Agenda attached.".to_string(),
        user_id: 1,
    };
    let created = client.post::<_, Post>("/posts", &new_post).await?;
    println!("Created post {} ({})", created.data.id, created.status);

    Ok(())
}
