//! Remote fetch engine shared by the connector nodes.

pub mod cache;
pub mod fetcher;
pub mod limiter;
pub mod transport;

pub use cache::{Fetched, RequestCache};
pub use fetcher::Fetcher;
pub use limiter::ConcurrencyLimiter;
pub use transport::{ApiRequest, HttpTransport, Method, RetryingTransport, Transport, TransportError};
