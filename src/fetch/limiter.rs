use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const MAX_CONCURRENCY: usize = 20;

/// Caps the number of simultaneously in-flight remote calls.
///
/// Clones share the same ceiling. Admission is FIFO through the semaphore.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    ceiling: usize,
    gauge: Arc<Gauge>,
}

#[derive(Default)]
struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Held for the duration of one call; releases the slot on drop.
pub struct LimiterPermit {
    _permit: Option<OwnedSemaphorePermit>,
    gauge: Arc<Gauge>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl ConcurrencyLimiter {
    /// Out-of-range ceilings are clamped into `1..=20`.
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.clamp(1, MAX_CONCURRENCY);
        Self {
            semaphore: Arc::new(Semaphore::new(ceiling)),
            ceiling,
            gauge: Arc::new(Gauge::default()),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Calls currently admitted.
    pub fn active(&self) -> usize {
        self.gauge.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously admitted calls seen so far.
    pub fn peak(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    pub async fn acquire(&self) -> LimiterPermit {
        // The semaphore is never closed, so acquisition only fails if that
        // invariant is broken; the call then proceeds unthrottled.
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok();
        let now = self.gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        LimiterPermit {
            _permit: permit,
            gauge: Arc::clone(&self.gauge),
        }
    }

    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        let _permit = self.acquire().await;
        fut.await
    }
}
