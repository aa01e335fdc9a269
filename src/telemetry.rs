//! Observability for the resilience boundary (§4.10): every call emits a sanitized
//! `BoundaryEvent` before the request goes out and after it resolves, consumed by
//! whatever `ObservabilitySink` the embedder wired up. Emission is always
//! best-effort: a sink failure never changes the outcome of the call it describes.

use crate::error::CanonicalError;
use crate::normalize::ResponseMeta;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Emitted just before a request goes out. Headers/query/body have already passed
/// through [`crate::sanitize::sanitize_request`]; nothing sensitive reaches a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub provider: String,
    pub request_id: String,
    pub method: String,
    pub endpoint: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
}

/// Emitted once a call completes successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseContext {
    pub provider: String,
    pub request_id: String,
    pub status: u16,
    pub duration: Duration,
    pub meta: ResponseMeta,
}

/// Emitted once a call fails for good (after retries are exhausted or the failure
/// was non-retryable). `attempt` is the 0-indexed attempt number that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    pub provider: String,
    pub request_id: String,
    pub error: CanonicalError,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryEvent {
    Request(RequestContext),
    Response(ResponseContext),
    Error(ErrorContext),
}

impl fmt::Display for BoundaryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryEvent::Request(ctx) => write!(f, "request{{provider={} method={} endpoint={}}}", ctx.provider, ctx.method, ctx.endpoint),
            BoundaryEvent::Response(ctx) => write!(f, "response{{provider={} status={} duration={:?}}}", ctx.provider, ctx.status, ctx.duration),
            BoundaryEvent::Error(ctx) => write!(f, "error{{provider={} code={:?} attempt={}}}", ctx.provider, ctx.error.code, ctx.attempt),
        }
    }
}

/// Consumes `BoundaryEvent`s. Implementations should never block the calling
/// pipeline for long; `emit_best_effort` already swallows errors, so a sink that
/// wants backpressure or guaranteed delivery needs its own buffering.
#[async_trait]
pub trait ObservabilitySink: Send + Sync {
    type Error: std::error::Error + Send + 'static;

    async fn emit(&self, event: BoundaryEvent) -> Result<(), Self::Error>;
}

/// Emits `event` on `sink`, logging (not propagating) any failure. Nothing in the
/// pipeline depends on observability succeeding.
pub async fn emit_best_effort<S: ObservabilitySink>(sink: S, event: BoundaryEvent) {
    if let Err(err) = sink.emit(event).await {
        tracing::warn!(error = %err, "observability sink failed");
    }
}

/// Emits the three mandated request metrics via `tracing`, using the
/// `counter.`/`histogram.` field-name convention that metrics-bridging layers
/// (e.g. `tracing-opentelemetry`) recognize, since this crate carries no metrics
/// backend of its own.
pub fn emit_request_metrics(provider: &str, endpoint: &str, status_or_category: &str, duration: Duration, is_error: bool) {
    tracing::info!(
        target: "boundary::metrics",
        "counter.boundary.request.count" = 1u64,
        provider,
        endpoint,
        status = status_or_category,
    );
    tracing::info!(
        target: "boundary::metrics",
        "histogram.boundary.request.duration" = duration.as_secs_f64(),
        provider,
        endpoint,
    );
    if is_error {
        tracing::info!(
            target: "boundary::metrics",
            "counter.boundary.request.error" = 1u64,
            provider,
            endpoint,
            error_category = status_or_category,
        );
    }
}

/// Discards every event. The default for pipelines that don't wire up a sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl ObservabilitySink for NullSink {
    type Error = std::convert::Infallible;

    async fn emit(&self, _event: BoundaryEvent) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Logs every event through `tracing` at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ObservabilitySink for LogSink {
    type Error = std::convert::Infallible;

    async fn emit(&self, event: BoundaryEvent) -> Result<(), Self::Error> {
        tracing::info!(event = %event, "boundary_event");
        Ok(())
    }
}

/// Stores events in memory. Useful for tests and for embedders building their own
/// dashboards on top of a polling read. Bounded by default; oldest events are
/// evicted once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<BoundaryEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { events: Arc::new(Mutex::new(Vec::new())), capacity: capacity.max(1), evicted: Arc::new(AtomicU64::new(0)) }
    }

    pub fn events(&self) -> Vec<BoundaryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObservabilitySink for MemorySink {
    type Error = std::convert::Infallible;

    async fn emit(&self, event: BoundaryEvent) -> Result<(), Self::Error> {
        let mut guard = self.events.lock().unwrap();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Ok(())
    }
}

/// Broadcasts events to any number of subscribers via `tokio::sync::broadcast`.
/// Subscribers that fall behind miss events once the channel's buffer wraps.
#[derive(Clone)]
pub struct StreamingSink {
    tx: tokio::sync::broadcast::Sender<BoundaryEvent>,
}

impl StreamingSink {
    pub fn new(buffer: usize) -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(buffer);
        Self { tx }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BoundaryEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ObservabilitySink for StreamingSink {
    type Error = std::convert::Infallible;

    async fn emit(&self, event: BoundaryEvent) -> Result<(), Self::Error> {
        let _ = self.tx.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> BoundaryEvent {
        BoundaryEvent::Request(RequestContext {
            provider: "stripe".to_string(),
            request_id: "req-1".to_string(),
            method: "GET".to_string(),
            endpoint: "/charges".to_string(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
        })
    }

    #[tokio::test]
    async fn memory_sink_records_events_in_order() {
        let sink = MemorySink::new();
        emit_best_effort(sink.clone(), sample_request()).await;
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0], sample_request());
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest_past_capacity() {
        let sink = MemorySink::with_capacity(1);
        emit_best_effort(sink.clone(), sample_request()).await;
        emit_best_effort(sink.clone(), sample_request()).await;
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.evicted(), 1);
    }

    #[tokio::test]
    async fn streaming_sink_delivers_to_subscriber() {
        let sink = StreamingSink::new(8);
        let mut rx = sink.subscribe();
        emit_best_effort(sink.clone(), sample_request()).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received, sample_request());
    }

    #[tokio::test]
    async fn null_sink_never_errors() {
        emit_best_effort(NullSink, sample_request()).await;
    }
}
