mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockTransport;
use futures_util::future::join_all;
use ironlink::engine::types::FetchSettings;
use ironlink::fetch::{ConcurrencyLimiter, Fetcher};
use serde_json::json;

#[test]
fn ceiling_is_clamped() {
    assert_eq!(ConcurrencyLimiter::new(0).ceiling(), 1);
    assert_eq!(ConcurrencyLimiter::new(7).ceiling(), 7);
    assert_eq!(ConcurrencyLimiter::new(500).ceiling(), 20);
    assert_eq!(ConcurrencyLimiter::default().ceiling(), 5);
}

#[tokio::test]
async fn never_exceeds_ceiling() {
    let limiter = ConcurrencyLimiter::new(3);
    let tasks = (0..12).map(|_| {
        let limiter = limiter.clone();
        async move {
            limiter
                .run(tokio::time::sleep(Duration::from_millis(10)))
                .await
        }
    });
    join_all(tasks).await;

    assert_eq!(limiter.peak(), 3);
    assert_eq!(limiter.active(), 0);
}

#[tokio::test]
async fn permits_are_released_on_drop() {
    let limiter = ConcurrencyLimiter::new(1);
    {
        let _permit = limiter.acquire().await;
        assert_eq!(limiter.active(), 1);
    }
    assert_eq!(limiter.active(), 0);
    let _again = limiter.acquire().await;
    assert_eq!(limiter.active(), 1);
}

#[tokio::test]
async fn fetcher_bounds_physical_calls() {
    let mock = Arc::new(
        MockTransport::new()
            .with_delay(Duration::from_millis(15))
            .get("http://api/Manufacturer/*", json!({"name": "ACME"})),
    );
    let settings = FetchSettings {
        concurrency: 4,
        ..FetchSettings::default()
    };
    let fetcher = Fetcher::new(mock.clone(), &settings);

    let urls: Vec<String> = (0..16)
        .map(|i| format!("http://api/Manufacturer/{}", i))
        .collect();
    let results = join_all(urls.iter().map(|u| fetcher.get(u, "Manufacturer"))).await;

    assert_eq!(results.len(), 16);
    assert_eq!(mock.calls().len(), 16);
    assert!(mock.peak() <= 4, "peak {} above ceiling", mock.peak());
    assert_eq!(fetcher.limiter().peak(), 4);
}
