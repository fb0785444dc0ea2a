//! Simple example of using discreet-request.

use discreet_request::{DiscreetConfig, DiscreetRequest, MemoryCache, ProxyPoolConfig, RequestOptions};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Initializing proxy pool...");

    let pool = ProxyPoolConfig::builder()
        // one "host:port" per line
        .proxies_from_file("proxies.txt")?
        .target_endpoint("https://httpbin.org/ip")
        .refresh_proxies(true)
        .refresh_rate(Duration::from_secs(600))
        .build();

    let config = DiscreetConfig::builder()
        .pool(pool)
        // 3 requests every 5 seconds, health checks included
        .dispatch(3, Duration::from_secs(5))
        .max_retries(2)
        .cache(true)
        .build();

    let client = Arc::new(DiscreetRequest::with_reqwest(config)?.with_cache(Arc::new(MemoryCache::new())));
    client.init().await;

    let endpoint = "https://api.ipify.org";
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client.request_with_cache(endpoint, RequestOptions::new(), false).await
        }));
    }

    for handle in handles {
        match handle.await? {
            Ok(response) => println!(
                "[{:?}] {} ==> {:?} {}",
                start.elapsed(),
                endpoint,
                response.status_code,
                response.body
            ),
            Err(e) => println!("[{:?}] {} failed: {}", start.elapsed(), endpoint, e),
        }
    }

    client.close();
    Ok(())
}
