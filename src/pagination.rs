//! Pagination (§4.6): three cursor strategies behind one trait, and a lazy, finite,
//! non-restartable stream of pages built on top of whichever one an adapter picks.

use crate::error::PaginationError;
use crate::headers::{extract_query_param, find_next_link};
use futures::future::BoxFuture;
use futures::stream::Stream;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A hard ceiling on pages fetched by a single `PageStream`, independent of cycle
/// detection: a pathological provider that never repeats a cursor still can't wedge
/// a caller into an unbounded fetch loop.
pub const MAX_PAGES: usize = 1000;

/// One fetched page: its parsed body and the raw response headers, since a strategy
/// may need either to compute the next cursor.
#[derive(Debug, Clone)]
pub struct Page {
    pub body: Value,
    pub headers: HeaderMap,
}

/// Computes the next page's cursor from the page just fetched. Returning `None` ends
/// the stream.
pub trait PaginationStrategy: Send + Sync {
    fn initial_cursor(&self) -> Option<String>;
    fn next_cursor(&self, page: &Page) -> Option<String>;
    /// How the cursor is attached to the next request: as a query parameter name/value.
    fn cursor_query_param(&self) -> &str;
}

/// Follows the `Link: rel="next"` header, extracting its `page` query parameter as
/// the opaque cursor value to carry forward.
#[derive(Debug, Clone, Default)]
pub struct LinkHeaderStrategy;

impl PaginationStrategy for LinkHeaderStrategy {
    fn initial_cursor(&self) -> Option<String> {
        None
    }

    fn next_cursor(&self, page: &Page) -> Option<String> {
        let next_url = find_next_link(&page.headers)?;
        extract_query_param(&next_url, "page").or(Some(next_url))
    }

    fn cursor_query_param(&self) -> &str {
        "page"
    }
}

/// Reads an opaque cursor out of a named top-level body field (e.g. `next_cursor`).
#[derive(Debug, Clone)]
pub struct OpaqueCursorStrategy {
    pub body_field: String,
    pub query_param: String,
}

impl OpaqueCursorStrategy {
    pub fn new(body_field: impl Into<String>, query_param: impl Into<String>) -> Self {
        Self { body_field: body_field.into(), query_param: query_param.into() }
    }
}

impl PaginationStrategy for OpaqueCursorStrategy {
    fn initial_cursor(&self) -> Option<String> {
        None
    }

    fn next_cursor(&self, page: &Page) -> Option<String> {
        page.body.get(&self.body_field)?.as_str().map(|s| s.to_string())
    }

    fn cursor_query_param(&self) -> &str {
        &self.query_param
    }
}

/// Numeric offset paging: advances by `page_size` each page until the body's `total`
/// field indicates there's nothing left.
#[derive(Debug, Clone)]
pub struct OffsetStrategy {
    pub page_size: u64,
    pub total_field: String,
}

impl OffsetStrategy {
    pub fn new(page_size: u64, total_field: impl Into<String>) -> Self {
        Self { page_size, total_field: total_field.into() }
    }
}

impl PaginationStrategy for OffsetStrategy {
    fn initial_cursor(&self) -> Option<String> {
        Some("0".to_string())
    }

    fn next_cursor(&self, page: &Page) -> Option<String> {
        let current_offset: u64 = page.body.get("offset").and_then(|v| v.as_u64()).unwrap_or(0);
        let next_offset = current_offset + self.page_size;
        let total = page.body.get(&self.total_field).and_then(|v| v.as_u64());
        match total {
            Some(total) if next_offset >= total => None,
            _ => Some(next_offset.to_string()),
        }
    }

    fn cursor_query_param(&self) -> &str {
        "offset"
    }
}

type FetchFuture = BoxFuture<'static, Result<Page, PaginationError>>;

/// A lazy, finite, non-restartable stream of pages. Each item is either a
/// successfully fetched `Page` or a `PaginationError` (cycle or page-cap), after
/// which the stream ends.
pub struct PageStream<F> {
    fetch: F,
    strategy: Box<dyn PaginationStrategy>,
    next_cursor: Option<String>,
    seen: HashSet<String>,
    pages_fetched: usize,
    in_flight: Option<FetchFuture>,
    done: bool,
}

impl<F, Fut> PageStream<F>
where
    F: FnMut(Option<String>) -> Fut + Send,
    Fut: Future<Output = Result<Page, PaginationError>> + Send + 'static,
{
    pub fn new(strategy: Box<dyn PaginationStrategy>, fetch: F) -> Self {
        let next_cursor = strategy.initial_cursor();
        Self { fetch, strategy, next_cursor, seen: HashSet::new(), pages_fetched: 0, in_flight: None, done: false }
    }
}

impl<F, Fut> Stream for PageStream<F>
where
    F: FnMut(Option<String>) -> Fut + Send + Unpin,
    Fut: Future<Output = Result<Page, PaginationError>> + Send + 'static,
{
    type Item = Result<Page, PaginationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        if this.in_flight.is_none() {
            if this.pages_fetched >= MAX_PAGES {
                this.done = true;
                return Poll::Ready(Some(Err(PaginationError::PageCapExceeded(MAX_PAGES))));
            }
            let cursor = this.next_cursor.clone();
            this.in_flight = Some(Box::pin((this.fetch)(cursor)));
        }

        let fut = this.in_flight.as_mut().unwrap();
        match fut.as_mut().poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.in_flight = None;
                this.pages_fetched += 1;
                match result {
                    Ok(page) => {
                        let next = this.strategy.next_cursor(&page);
                        match next {
                            None => {
                                this.done = true;
                            }
                            Some(cursor) => {
                                if !this.seen.insert(cursor.clone()) {
                                    this.done = true;
                                    return Poll::Ready(Some(Err(PaginationError::CycleDetected(cursor))));
                                }
                                this.next_cursor = Some(cursor);
                            }
                        }
                        Poll::Ready(Some(Ok(page)))
                    }
                    Err(e) => {
                        this.done = true;
                        Poll::Ready(Some(Err(e)))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn page(body: Value) -> Page {
        Page { body, headers: HeaderMap::new() }
    }

    #[tokio::test]
    async fn offset_strategy_stops_when_total_reached() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let mut stream = PageStream::new(Box::new(OffsetStrategy::new(10, "total")), move |cursor: Option<String>| {
            let c = c.clone();
            let offset: u64 = cursor.and_then(|s| s.parse().ok()).unwrap_or(0);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(page(json!({"offset": offset, "total": 25})))
            }
        });

        let mut pages = Vec::new();
        while let Some(item) = stream.next().await {
            pages.push(item.unwrap());
        }
        assert_eq!(pages.len(), 3);
    }

    #[tokio::test]
    async fn opaque_cursor_strategy_follows_body_field() {
        let mut calls = 0;
        let mut stream =
            PageStream::new(Box::new(OpaqueCursorStrategy::new("next_cursor", "cursor")), move |cursor: Option<String>| {
                calls += 1;
                let call_number = calls;
                async move {
                    if call_number < 3 {
                        Ok(page(json!({"next_cursor": format!("c{}", call_number)})))
                    } else {
                        Ok(page(json!({})))
                    }
                }
            });

        let mut count = 0;
        while let Some(item) = stream.next().await {
            item.unwrap();
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn cycle_detection_stops_the_stream() {
        let mut stream = PageStream::new(Box::new(OpaqueCursorStrategy::new("next_cursor", "cursor")), move |_| async {
            Ok(page(json!({"next_cursor": "same"})))
        });

        let first = stream.next().await.unwrap();
        assert!(first.is_ok());
        let second = stream.next().await.unwrap();
        assert!(matches!(second, Err(PaginationError::CycleDetected(_))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn page_cap_is_enforced() {
        let mut counter = 0u64;
        let mut stream = PageStream::new(Box::new(OpaqueCursorStrategy::new("next_cursor", "cursor")), move |_| {
            counter += 1;
            let n = counter;
            async move { Ok(page(json!({"next_cursor": n.to_string()}))) }
        });

        let mut count = 0;
        loop {
            match stream.next().await {
                Some(Ok(_)) => count += 1,
                Some(Err(PaginationError::PageCapExceeded(cap))) => {
                    assert_eq!(cap, MAX_PAGES);
                    break;
                }
                Some(Err(e)) => panic!("unexpected error: {e}"),
                None => panic!("stream ended without hitting the cap"),
            }
        }
        assert_eq!(count, MAX_PAGES);
    }
}
