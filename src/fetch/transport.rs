use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// HTTP verbs the connectors need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// One outbound call: method, absolute URL, headers and an optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Failure of a single remote call.
///
/// The first three variants are the transient categories that the retrying
/// layer re-attempts once; everything else propagates unchanged.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("socket closed: {0}")]
    SocketClosed(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Map a surfaced error message onto a category.
    ///
    /// Recognizes the historical markers ("socket hang up", "ECONNRESET",
    /// "timeout") alongside their plain-English spellings.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("econnreset") || lower.contains("connection reset") {
            TransportError::ConnectionReset(message)
        } else if lower.contains("socket hang up") || lower.contains("socket closed") {
            TransportError::SocketClosed(message)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            TransportError::Timeout(message)
        } else {
            TransportError::Other(message)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionReset(_)
                | TransportError::SocketClosed(_)
                | TransportError::Timeout(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::Status { status: 404, .. })
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportError::Timeout(error_chain(&err));
        }
        TransportError::classify(error_chain(&err))
    }
}

/// Flatten an error and its sources into one line; reqwest hides the
/// interesting part (e.g. "connection reset by peer") in the source chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Something that can perform one remote call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, request: &ApiRequest) -> Result<Value, TransportError>;
}

/// `reqwest`-backed transport. JSON in, JSON out; non-JSON bodies come back
/// as a JSON string, empty bodies as `null`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::from_reqwest)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, request: &ApiRequest) -> Result<Value, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        let mut header_map = HeaderMap::new();
        for (k, v) in &request.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| TransportError::Other(format!("invalid header name '{}': {}", k, e)))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| TransportError::Other(format!("invalid value for header '{}': {}", k, e)))?;
            header_map.insert(name, value);
        }
        builder = builder.headers(header_map);

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status();
        let body_text = response.text().await.map_err(TransportError::from_reqwest)?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: request.url.clone(),
                body: body_text,
            });
        }

        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body_text).unwrap_or(Value::String(body_text)))
    }
}

/// Wraps a transport with a single retry on transient failures.
///
/// Backoff is `base_delay * 3 * (1 + jitter)`, jitter uniform in `[0, 0.2)`.
pub struct RetryingTransport {
    inner: Arc<dyn Transport>,
    base_delay: Duration,
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn Transport>, base_delay: Duration) -> Self {
        Self { inner, base_delay }
    }

    pub fn backoff(&self) -> Duration {
        backoff_delay(self.base_delay, fastrand::f64() * 0.2)
    }
}

/// Delay before the retry attempt for a given jitter fraction.
pub fn backoff_delay(base_delay: Duration, jitter: f64) -> Duration {
    base_delay.mul_f64(3.0 * (1.0 + jitter))
}

#[async_trait]
impl Transport for RetryingTransport {
    async fn call(&self, request: &ApiRequest) -> Result<Value, TransportError> {
        match self.inner.call(request).await {
            Err(e) if e.is_transient() => {
                let delay = self.backoff();
                warn!(
                    url = %request.url,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying once"
                );
                tokio::time::sleep(delay).await;
                self.inner.call(request).await
            }
            other => other,
        }
    }
}
