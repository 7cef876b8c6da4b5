//! Paginated collection with identity de-duplication.
//!
//! Three entry points: sequential paging, paging with a parallel lookahead,
//! and fetching an explicit id list in fixed-size batches.

use std::collections::HashSet;
use std::future::Future;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::debug;

use crate::fetch::limiter::MAX_CONCURRENCY;

/// Which page to fetch next. `index` is the zero-based page number and
/// `offset` the first row, so both page- and range-style APIs are covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub index: usize,
    pub offset: usize,
    pub size: usize,
}

impl PageRequest {
    /// Inclusive end row, as used by `range=<start>-<end>` queries.
    pub fn last_row(&self) -> usize {
        self.offset + self.size.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectOptions {
    pub page_size: usize,
    /// `None` collects everything.
    pub limit: Option<usize>,
    /// Stop after this many consecutive pages contributed nothing new.
    pub max_idle_pages: usize,
    /// Pages fetched concurrently per round by [`collect_pages_parallel`].
    pub lookahead: usize,
}

impl CollectOptions {
    pub fn new(page_size: usize, limit: Option<usize>) -> Self {
        Self {
            page_size: page_size.max(1),
            limit,
            max_idle_pages: 2,
            lookahead: 1,
        }
    }

    fn quota_reached(&self, collected: usize) -> bool {
        self.limit.is_some_and(|limit| collected >= limit)
    }
}

/// Progress through one collection call.
#[derive(Debug)]
pub struct PageCursor {
    pub index: usize,
    pub page_size: usize,
    seen: HashSet<String>,
}

impl PageCursor {
    pub fn new(page_size: usize) -> Self {
        Self {
            index: 0,
            page_size,
            seen: HashSet::new(),
        }
    }

    pub fn request(&self) -> PageRequest {
        self.request_at(self.index)
    }

    fn request_at(&self, index: usize) -> PageRequest {
        PageRequest {
            index,
            offset: index * self.page_size,
            size: self.page_size,
        }
    }

    pub fn advance(&mut self, pages: usize) {
        self.index += pages;
    }

    /// Record `item`'s identity; false if it has none or was seen before.
    pub fn admit(&mut self, item: &Value) -> bool {
        match identity_key(item) {
            Some(key) => self.seen.insert(key),
            None => false,
        }
    }

    pub fn seen(&self) -> usize {
        self.seen.len()
    }
}

/// Identity of a remote entity: its `id`, numeric or textual.
pub fn identity_key(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// What a page contributed, and whether paging should stop after it.
enum PageVerdict {
    Continue,
    Stop,
}

struct Accumulator<'a> {
    options: &'a CollectOptions,
    cursor: PageCursor,
    items: Vec<Value>,
    idle_pages: usize,
}

impl<'a> Accumulator<'a> {
    fn new(options: &'a CollectOptions) -> Self {
        Self {
            options,
            cursor: PageCursor::new(options.page_size),
            items: Vec::new(),
            idle_pages: 0,
        }
    }

    fn absorb(&mut self, page: Vec<Value>) -> PageVerdict {
        let received = page.len();
        let mut fresh = 0;
        for item in page {
            if self.options.quota_reached(self.items.len()) {
                break;
            }
            if self.cursor.admit(&item) {
                self.items.push(item);
                fresh += 1;
            }
        }
        debug!(
            page = self.cursor.index,
            received, fresh, total = self.items.len(), "Page absorbed"
        );
        self.cursor.advance(1);

        if self.options.quota_reached(self.items.len()) || received < self.options.page_size {
            return PageVerdict::Stop;
        }
        if fresh == 0 {
            self.idle_pages += 1;
            if self.idle_pages >= self.options.max_idle_pages.max(1) {
                return PageVerdict::Stop;
            }
        } else {
            self.idle_pages = 0;
        }
        PageVerdict::Continue
    }
}

/// Page through a collection one page at a time.
///
/// Stops when the quota is met, on a short page, or after
/// `max_idle_pages` consecutive pages with nothing new.
pub async fn collect_pages<F, Fut>(options: &CollectOptions, mut fetch_page: F) -> Vec<Value>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Vec<Value>>,
{
    let mut acc = Accumulator::new(options);
    if options.quota_reached(0) {
        return acc.items;
    }
    loop {
        let page = fetch_page(acc.cursor.request()).await;
        if let PageVerdict::Stop = acc.absorb(page) {
            break;
        }
    }
    acc.items
}

/// Like [`collect_pages`] but fetches `lookahead` pages concurrently per
/// round. Pages are absorbed in index order and the first stop signal in a
/// round discards the later pages of that round.
pub async fn collect_pages_parallel<F, Fut>(options: &CollectOptions, mut fetch_page: F) -> Vec<Value>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Vec<Value>>,
{
    let lookahead = options.lookahead.max(1);
    let mut acc = Accumulator::new(options);
    if options.quota_reached(0) {
        return acc.items;
    }
    loop {
        let first = acc.cursor.index;
        let requests: Vec<PageRequest> = (first..first + lookahead)
            .map(|index| acc.cursor.request_at(index))
            .collect();
        let pages = join_all(requests.into_iter().map(&mut fetch_page)).await;
        for page in pages {
            if let PageVerdict::Stop = acc.absorb(page) {
                return acc.items;
            }
        }
    }
}

/// Batch size for id-driven fetching: twice the limiter ceiling, at most 20.
pub fn batch_size(ceiling: usize) -> usize {
    (ceiling.max(1) * 2).min(MAX_CONCURRENCY)
}

/// Fetch exactly the given ids (up to `limit`) in concurrent batches,
/// preserving id order and skipping ids that yield nothing.
pub async fn collect_by_ids<T, F, Fut>(
    ids: Vec<T>,
    limit: Option<usize>,
    batch: usize,
    mut fetch_one: F,
) -> Vec<Value>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Option<Value>>,
{
    let mut ids = ids;
    if let Some(limit) = limit {
        ids.truncate(limit);
    }
    let batch = batch.max(1);
    let mut out = Vec::with_capacity(ids.len());
    let mut ids = ids.into_iter().peekable();
    while ids.peek().is_some() {
        let chunk: Vec<T> = ids.by_ref().take(batch).collect();
        let fetched = join_all(chunk.into_iter().map(&mut fetch_one)).await;
        out.extend(fetched.into_iter().flatten());
    }
    out
}
