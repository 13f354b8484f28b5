//! Simple example of using proxy-rotor.
//!
//! Reads proxies from `$PROXIES` (comma separated), e.g.
//! `PROXIES=socks5://127.0.0.1:1080,http://127.0.0.1:8080`.

use proxy_rotor::{ProxyPool, ProxyPoolConfig, ProxyPoolMiddleware, RetryConfig, RotationStrategy};
use reqwest_middleware::ClientBuilder;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Initializing proxy pool...");

    let config = ProxyPoolConfig::builder()
        .rotation_strategy(RotationStrategy::Weighted)
        .retry(RetryConfig {
            max_retries: 2,
            attempt_timeout: Duration::from_secs(10),
            ..Default::default()
        })
        // rate limit for each proxy, lower performance but avoid bans
        .max_requests_per_second(3.0)
        .build();

    let pool = ProxyPool::from_env("PROXIES", config)?;

    // Direct use: run an operation against whichever proxy the pool picks.
    let origin = pool
        .run_with_retry(
            |proxy| async move {
                let client = reqwest::Client::builder()
                    .proxy(reqwest::Proxy::all(&proxy)?)
                    .build()?;
                client.get("https://httpbin.org/ip").send().await?.text().await
            },
            None,
        )
        .await;
    println!("Direct: {:?}", origin);

    // Middleware use: every request is routed through the pool.
    let client = ClientBuilder::new(reqwest::Client::new())
        .with(ProxyPoolMiddleware::new(pool.clone()))
        .build();

    println!("Sending request...");
    match client.get("https://httpbin.org/ip").send().await {
        Ok(response) => {
            println!("Status: {}", response.status());
            println!("Response: {}", response.text().await?);
        }
        Err(e) => println!("Request failed: {}", e),
    }

    println!("{}", serde_json::to_string_pretty(&pool.snapshot())?);
    pool.shutdown().await;

    Ok(())
}
