use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::cache::{Fetched, RequestCache};
use super::limiter::ConcurrencyLimiter;
use super::transport::{ApiRequest, RetryingTransport, Transport, TransportError};
use crate::engine::types::FetchSettings;

/// The read path every connector goes through: Cache → Limiter → Retrying
/// transport. Writes skip the cache and the retry.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    retrying: Arc<RetryingTransport>,
    cache: RequestCache,
    limiter: ConcurrencyLimiter,
    headers: Arc<Vec<(String, String)>>,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, settings: &FetchSettings) -> Self {
        let retrying = Arc::new(RetryingTransport::new(
            Arc::clone(&transport),
            settings.retry_base_delay,
        ));
        Self {
            transport,
            retrying,
            cache: RequestCache::with_ttl(settings.cache_ttl),
            limiter: ConcurrencyLimiter::new(settings.concurrency),
            headers: Arc::new(Vec::new()),
        }
    }

    /// A fetcher sending `headers` on every call while sharing this one's
    /// cache and limiter.
    pub fn with_headers(&self, headers: Vec<(String, String)>) -> Self {
        Self {
            headers: Arc::new(headers),
            ..self.clone()
        }
    }

    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Cached, single-flight, concurrency-limited GET with one transient retry.
    pub async fn get(&self, url: &str, entity: &str) -> Fetched {
        let request = ApiRequest::get(url).headers(self.headers.iter().cloned());
        let limiter = self.limiter.clone();
        let transport = Arc::clone(&self.retrying);
        let entity = entity.to_string();

        self.cache
            .get_or_fetch(url, move || async move {
                let _permit = limiter.acquire().await;
                let started = Instant::now();
                let result = transport.call(&request).await;
                debug!(
                    entity = %entity,
                    url = %request.url,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    active = limiter.active(),
                    ok = result.is_ok(),
                    "Fetched"
                );
                result
            })
            .await
    }

    /// Uncached, non-retried call (used for writes).
    pub async fn send(&self, request: ApiRequest) -> Result<Value, TransportError> {
        let request = request.headers(self.headers.iter().cloned());
        let _permit = self.limiter.acquire().await;
        self.transport.call(&request).await
    }
}
