//! Pipeline execution (§4.9): the fixed 14-step sequence every call to a provider
//! goes through, composing auth, rate limiting, circuit breaking, retry, HTTP
//! execution, normalization, and observability into one `execute` call.

use crate::adapter::{ProviderAdapter, RawError, RawResponse, RequestOptions};
use crate::circuit_breaker::CircuitBreaker;
use crate::error::{CanonicalError, ErrorCategory, PaginationError};
use crate::http::{as_raw_error, HttpTransport};
use crate::idempotency::{IdempotencyLevel, IdempotencyResolver};
use crate::normalize::{NormalizedResponse, PaginationInfo, ResponseMeta};
use crate::pagination::{Page, PageStream, PaginationStrategy};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::sanitize::{sanitize_error_metadata, sanitize_request};
use crate::telemetry::{emit_request_metrics, BoundaryEvent, ErrorContext, ObservabilitySink, RequestContext, ResponseContext};
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default per-request HTTP timeout (§4.9 step 7) absent a per-request override.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything one provider's calls are wired through. Built once by `registry.rs`
/// per provider and shared across calls.
#[derive(Clone)]
pub struct Pipeline<S> {
    provider: String,
    adapter: Arc<dyn ProviderAdapter>,
    transport: Arc<dyn HttpTransport>,
    circuit_breaker: CircuitBreaker,
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
    idempotency: IdempotencyResolver,
    sink: S,
    timeout: Duration,
    base_url: Option<String>,
    redacted_keys: Vec<String>,
}

impl<S> Pipeline<S>
where
    S: ObservabilitySink + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: impl Into<String>,
        adapter: Arc<dyn ProviderAdapter>,
        transport: Arc<dyn HttpTransport>,
        circuit_breaker: CircuitBreaker,
        rate_limiter: RateLimiter,
        retry: RetryPolicy,
        idempotency: IdempotencyResolver,
        sink: S,
        timeout: Duration,
        base_url: Option<String>,
        redacted_keys: Vec<String>,
    ) -> Self {
        Self { provider: provider.into(), adapter, transport, circuit_breaker, rate_limiter, retry, idempotency, sink, timeout, base_url, redacted_keys }
    }

    /// Runs one call end to end (§4.9 steps 1-14). `T` is the type the caller wants
    /// the response body deserialized into.
    pub async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        endpoint: &str,
        mut options: RequestOptions,
    ) -> Result<NormalizedResponse<T>, CanonicalError> {
        let request_id = uuid::Uuid::new_v4().to_string();

        let idempotency_config = self.adapter.idempotency_config();
        if idempotency_config.auto_generate_keys && options.idempotency_key.is_none() {
            options.idempotency_key = Some(uuid::Uuid::new_v4().to_string());
        }
        let has_key = options.idempotency_key.is_some();
        let level = self.idempotency.resolve(method, endpoint);

        self.emit_request(&request_id, method, endpoint, &options).await;

        let start = Instant::now();
        let result = self.run_authenticated_call::<T>(&request_id, method, endpoint, &options, level, has_key).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                self.emit_best_effort(BoundaryEvent::Response(ResponseContext {
                    provider: self.provider.clone(),
                    request_id: request_id.clone(),
                    status: 200,
                    duration,
                    meta: response.meta.clone(),
                }))
                .await;
                emit_request_metrics(&self.provider, endpoint, "200", duration, false);
            }
            Err(err) => {
                self.emit_best_effort(BoundaryEvent::Error(ErrorContext {
                    provider: self.provider.clone(),
                    request_id: request_id.clone(),
                    error: err.clone(),
                    attempt: 0,
                }))
                .await;
                emit_request_metrics(&self.provider, endpoint, &err.category.to_string(), duration, true);
            }
        }

        result
    }

    /// Lazily paginates `endpoint` (§4.6), driving the adapter's declared pagination
    /// strategy through the same auth/rate-limit/retry/breaker/HTTP path `execute`
    /// uses for a single call. Ends when the strategy reports no further cursor.
    pub async fn paginate<T>(
        &self,
        method: &str,
        endpoint: &str,
        options: RequestOptions,
    ) -> Pin<Box<dyn Stream<Item = Result<NormalizedResponse<T>, CanonicalError>> + Send>>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let strategy: Arc<dyn PaginationStrategy> = Arc::from(self.adapter.pagination_strategy().await);
        let cursor_param = strategy.cursor_query_param().to_string();
        let last_meta: Arc<Mutex<Option<ResponseMeta>>> = Arc::new(Mutex::new(None));

        let pipeline = self.clone();
        let method_owned = method.to_string();
        let endpoint_owned = endpoint.to_string();
        let fetch_meta = last_meta.clone();

        let fetch = move |cursor: Option<String>| {
            let pipeline = pipeline.clone();
            let method = method_owned.clone();
            let endpoint = endpoint_owned.clone();
            let cursor_param = cursor_param.clone();
            let fetch_meta = fetch_meta.clone();
            let mut page_options = options.clone();
            if let Some(cursor) = cursor {
                page_options.query.insert(cursor_param, cursor);
            }

            async move {
                let request_id = uuid::Uuid::new_v4().to_string();
                let level = pipeline.idempotency.resolve(&method, &endpoint);
                let has_key = page_options.idempotency_key.is_some();

                pipeline.emit_request(&request_id, &method, &endpoint, &page_options).await;
                let start = Instant::now();
                let result = pipeline.fetch_raw(&request_id, &method, &endpoint, &page_options, level, has_key).await;
                let duration = start.elapsed();

                match &result {
                    Ok(response) => emit_request_metrics(&pipeline.provider, &endpoint, &response.status.to_string(), duration, false),
                    Err(err) => emit_request_metrics(&pipeline.provider, &endpoint, &err.category.to_string(), duration, true),
                }

                let response = result?;
                let normalized = pipeline.adapter.parse_response(&response, &request_id);
                let mut meta = normalized.meta;
                meta.request_id = request_id;
                *fetch_meta.lock().unwrap() = Some(meta);
                Ok(Page { body: normalized.data, headers: response.headers })
            }
        };

        let page_stream = PageStream::new(Box::new(ArcStrategy(strategy.clone())), fetch);
        let provider = self.provider.clone();

        Box::pin(page_stream.map(move |page_result| {
            let page = match page_result {
                Ok(page) => page,
                Err(PaginationError::Fetch(err)) => return Err(err),
                Err(other) => return Err(CanonicalError::new(ErrorCategory::Provider, provider.clone(), other.to_string())),
            };
            let next_cursor = strategy.next_cursor(&page);
            let mut meta = last_meta.lock().unwrap().take().unwrap_or_else(|| {
                crate::normalize::assemble_meta(&provider, "", crate::headers::default_rate_limit_info(), None)
            });
            meta.pagination = Some(PaginationInfo { has_next: next_cursor.is_some(), cursor: next_cursor, total: None });
            let data: T = serde_json::from_value(page.body).map_err(|e| {
                CanonicalError::new(ErrorCategory::Validation, provider.clone(), format!("response body did not match expected shape: {e}"))
            })?;
            Ok(NormalizedResponse::new(data, meta))
        }))
    }

    async fn run_authenticated_call<T: serde::de::DeserializeOwned>(
        &self,
        request_id: &str,
        method: &str,
        endpoint: &str,
        options: &RequestOptions,
        level: IdempotencyLevel,
        has_key: bool,
    ) -> Result<NormalizedResponse<T>, CanonicalError> {
        let response = self.fetch_raw(request_id, method, endpoint, options, level, has_key).await?;

        let normalized = self.adapter.parse_response(&response, request_id);
        let mut meta = normalized.meta;
        meta.request_id = request_id.to_string();
        let data: T = serde_json::from_value(normalized.data).map_err(|e| {
            CanonicalError::new(ErrorCategory::Validation, self.provider.clone(), format!("response body did not match expected shape: {e}"))
                .with_request_id(request_id)
        })?;

        Ok(NormalizedResponse::new(data, meta))
    }

    /// Runs the auth/rate-limit/retry/breaker/HTTP path (§4.9 steps 1-8, 10-11)
    /// without normalizing the response, so `execute` and `paginate` can share it.
    async fn fetch_raw(
        &self,
        request_id: &str,
        method: &str,
        endpoint: &str,
        options: &RequestOptions,
        level: IdempotencyLevel,
        has_key: bool,
    ) -> Result<RawResponse, CanonicalError> {
        let auth_token = self.adapter.auth_strategy(None).await?;

        self.rate_limiter.acquire().await.map_err(|e| {
            CanonicalError::new(ErrorCategory::Provider, self.provider.clone(), e.to_string()).with_request_id(request_id)
        })?;

        let adapter = self.adapter.clone();
        let transport = self.transport.clone();
        let breaker = self.circuit_breaker.clone();
        let timeout = match options.timeout {
            Some(per_request) => self.timeout.min(per_request),
            None => self.timeout,
        };
        let base_url = self.base_url.clone();
        let provider = self.provider.clone();

        let method = method.to_string();
        let endpoint = endpoint.to_string();
        let options = options.clone();
        let request_id_owned = request_id.to_string();

        let raw = self
            .retry
            .execute(level, has_key, move || {
                let adapter = adapter.clone();
                let transport = transport.clone();
                let breaker = breaker.clone();
                let base_url = base_url.clone();
                let provider = provider.clone();
                let method = method.clone();
                let endpoint = endpoint.clone();
                let options = options.clone();
                let request_id_owned = request_id_owned.clone();
                let auth_token = auth_token.clone();

                async move {
                    breaker
                        .execute(&request_id_owned, move || {
                            let adapter = adapter.clone();
                            let transport = transport.clone();
                            let base_url = base_url.clone();
                            let provider = provider.clone();
                            let method = method.clone();
                            let endpoint = endpoint.clone();
                            let options = options.clone();
                            let auth_token = auth_token.clone();
                            async move {
                                let request = adapter.build_request(&endpoint, &options, &auth_token, base_url.as_deref())?;
                                let mut request = request;
                                request.method = method;
                                let send_result = transport.send(request, timeout).await;
                                match send_result {
                                    Ok(response) => Ok(response),
                                    Err(err) => {
                                        let raw_error = Self::raw_error_for(&err);
                                        Err(adapter_error_or_passthrough(&adapter, &err, raw_error, &provider))
                                    }
                                }
                            }
                        })
                        .await
                }
            })
            .await;

        match raw {
            Ok(response) => {
                let rate_info = self.adapter.rate_limit_policy(&response.headers);
                self.rate_limiter.update_from_headers(&rate_info);
                Ok(response)
            }
            Err(err) => {
                if err.category == ErrorCategory::RateLimit {
                    if let Some(retry_after) = err.retry_after {
                        if let Ok(duration) = retry_after.duration_since(std::time::SystemTime::now()) {
                            self.rate_limiter.handle_429(duration).await;
                        }
                    }
                }
                Err(err.with_request_id(request_id))
            }
        }
    }

    fn raw_error_for(err: &CanonicalError) -> RawError {
        as_raw_error(err)
    }

    async fn emit_request(&self, request_id: &str, method: &str, endpoint: &str, options: &RequestOptions) {
        let sanitized = sanitize_request(&options.headers, &options.query, options.body.as_ref(), &self.redacted_keys);

        self.emit_best_effort(BoundaryEvent::Request(RequestContext {
            provider: self.provider.clone(),
            request_id: request_id.to_string(),
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            headers: sanitized.headers,
            query: sanitized.query,
            body: sanitized.body,
        }))
        .await;
    }

    async fn emit_best_effort(&self, event: BoundaryEvent) {
        crate::telemetry::emit_best_effort(self.sink.clone(), event).await;
    }
}

/// Forwards to a shared `Arc<dyn PaginationStrategy>`, so the same strategy instance
/// can drive both `PageStream`'s internal cursor threading and this pipeline's own
/// `has_next` computation for `meta.pagination` without instantiating it twice.
struct ArcStrategy(Arc<dyn PaginationStrategy>);

impl PaginationStrategy for ArcStrategy {
    fn initial_cursor(&self) -> Option<String> {
        self.0.initial_cursor()
    }

    fn next_cursor(&self, page: &Page) -> Option<String> {
        self.0.next_cursor(page)
    }

    fn cursor_query_param(&self) -> &str {
        self.0.cursor_query_param()
    }
}

/// When `parseError` is silent on `category`/`retryable`, re-derive them instead of
/// trusting whatever the adapter returned (§4.7). When the failure never reached the
/// adapter (e.g. a transport-level timeout), the error is already canonical.
fn adapter_error_or_passthrough(adapter: &Arc<dyn ProviderAdapter>, transport_err: &CanonicalError, raw: RawError, provider: &str) -> CanonicalError {
    if raw.status.is_none() && matches!(transport_err.category, ErrorCategory::Network) {
        return transport_err.clone();
    }

    let mut canonical = adapter.parse_error(&raw);
    if canonical.category == ErrorCategory::Provider && canonical.status.is_none() {
        canonical.category = crate::error::infer_category(raw.status, &canonical.message);
        canonical.code = crate::error::derive_code(canonical.category, raw.status);
        canonical.retryable = crate::error::retryable_for_code(canonical.code);
    }
    if canonical.provider.is_empty() {
        canonical.provider = provider.to_string();
    }
    if let Some(metadata) = canonical.metadata.take() {
        canonical.metadata = Some(sanitize_error_metadata(&metadata));
    }
    canonical
}
