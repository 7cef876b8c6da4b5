use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde_json::Value;
use tokio::time::Instant;
use tracing::warn;

use super::transport::TransportError;

/// Entries are valid for five minutes after they were written.
pub const DEFAULT_TTL: Duration = Duration::from_millis(300_000);

static EMPTY_OBJECT: LazyLock<Value> = LazyLock::new(|| Value::Object(serde_json::Map::new()));

/// Outcome of a cached lookup.
///
/// A failed fetch still yields a usable (empty object) value so callers can
/// degrade gracefully, but the failure stays observable.
#[derive(Debug, Clone)]
pub enum Fetched {
    Resolved(Value),
    Failed(Arc<TransportError>),
}

impl Fetched {
    /// The fetched value, or an empty object when the fetch failed.
    pub fn value(&self) -> &Value {
        match self {
            Fetched::Resolved(v) => v,
            Fetched::Failed(_) => &EMPTY_OBJECT,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Fetched::Resolved(v) => v,
            Fetched::Failed(_) => EMPTY_OBJECT.clone(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Fetched::Failed(_))
    }

    pub fn error(&self) -> Option<&TransportError> {
        match self {
            Fetched::Resolved(_) => None,
            Fetched::Failed(e) => Some(e),
        }
    }

    /// Array payload, empty slice for anything else.
    pub fn items(&self) -> &[Value] {
        self.value().as_array().map(Vec::as_slice).unwrap_or(&[])
    }
}

type InFlight = Shared<BoxFuture<'static, Fetched>>;

enum Slot {
    Ready { outcome: Fetched, stored_at: Instant },
    Pending(InFlight),
}

/// Time-boxed, single-flight memoization of remote reads keyed by URL.
///
/// Scoped to one node execution: create it, hand it to every fetch, drop it.
#[derive(Clone)]
pub struct RequestCache {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    ttl: Duration,
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of URLs with a stored or pending entry.
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached outcome for `url`, join the call already in flight
    /// for it, or start `fetch` and publish it as the in-flight call.
    ///
    /// A pending call is always joined regardless of the age of any older
    /// entry; at most one physical call per URL is outstanding.
    pub async fn get_or_fetch<F, Fut>(&self, url: &str, fetch: F) -> Fetched
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, TransportError>> + Send + 'static,
    {
        let in_flight = {
            let mut slots = lock(&self.slots);
            match slots.get(url) {
                Some(Slot::Ready { outcome, stored_at }) if stored_at.elapsed() < self.ttl => {
                    return outcome.clone();
                }
                Some(Slot::Pending(pending)) => pending.clone(),
                _ => {
                    let pending = self.start(url, fetch());
                    slots.insert(url.to_string(), Slot::Pending(pending.clone()));
                    pending
                }
            }
        };
        in_flight.await
    }

    fn start<Fut>(&self, url: &str, fut: Fut) -> InFlight
    where
        Fut: Future<Output = Result<Value, TransportError>> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        let key = url.to_string();
        async move {
            let outcome = match fut.await {
                Ok(value) => Fetched::Resolved(value),
                Err(e) => {
                    warn!(url = %key, error = %e, "Fetch failed, caching empty fallback");
                    Fetched::Failed(Arc::new(e))
                }
            };
            lock(&slots).insert(
                key,
                Slot::Ready {
                    outcome: outcome.clone(),
                    stored_at: Instant::now(),
                },
            );
            outcome
        }
        .boxed()
        .shared()
    }
}

fn lock(slots: &Mutex<HashMap<String, Slot>>) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}
