//! Scripted in-memory transport shared by the integration tests.
#![allow(dead_code)]

pub mod fixtures;

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ironlink::fetch::{ApiRequest, Method, Transport, TransportError};
use serde_json::Value;

/// What a route answers.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Status(u16),
    Reset,
    Timeout,
}

impl Reply {
    fn into_result(self, url: &str) -> Result<Value, TransportError> {
        match self {
            Reply::Json(v) => Ok(v),
            Reply::Status(status) => Err(TransportError::Status {
                status,
                url: url.to_string(),
                body: String::new(),
            }),
            Reply::Reset => Err(TransportError::ConnectionReset("ECONNRESET".into())),
            Reply::Timeout => Err(TransportError::Timeout("timeout".into())),
        }
    }
}

struct Route {
    method: Method,
    /// Exact URL, or a prefix when it ends in `*`.
    pattern: String,
    /// Replies in call order; the last one repeats.
    replies: Vec<Reply>,
    hits: usize,
}

impl Route {
    fn matches(&self, request: &ApiRequest) -> bool {
        if self.method != request.method {
            return false;
        }
        match self.pattern.strip_suffix('*') {
            Some(prefix) => request.url.starts_with(prefix),
            None => request.url == self.pattern,
        }
    }
}

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<ApiRequest>>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn route(self, method: Method, pattern: &str, replies: Vec<Reply>) -> Self {
        self.routes.lock().unwrap().push(Route {
            method,
            pattern: pattern.to_string(),
            replies,
            hits: 0,
        });
        self
    }

    pub fn get(self, pattern: &str, body: Value) -> Self {
        self.route(Method::Get, pattern, vec![Reply::Json(body)])
    }

    pub fn post(self, pattern: &str, body: Value) -> Self {
        self.route(Method::Post, pattern, vec![Reply::Json(body)])
    }

    pub fn get_replies(self, pattern: &str, replies: Vec<Reply>) -> Self {
        self.route(Method::Get, pattern, replies)
    }

    pub fn post_replies(self, pattern: &str, replies: Vec<Reply>) -> Self {
        self.route(Method::Post, pattern, replies)
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose URL equals `url`, or starts with it when it ends in `*`.
    pub fn count(&self, method: Method, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method)
            .filter(|c| match url.strip_suffix('*') {
                Some(prefix) => c.url.starts_with(prefix),
                None => c.url == url,
            })
            .count()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, request: &ApiRequest) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            routes.iter_mut().find(|r| r.matches(request)).map(|route| {
                let index = route.hits.min(route.replies.len().saturating_sub(1));
                route.hits += 1;
                route.replies.get(index).cloned().unwrap_or(Reply::Status(404))
            })
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
            .unwrap_or(Reply::Status(404))
            .into_result(&request.url)
    }
}
