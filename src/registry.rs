//! Lifecycle and registry (§4.11): a `BoundaryClient` owns one `Pipeline` per
//! registered provider, validates every adapter at startup, and exposes per-provider
//! circuit breaker status for operational tooling.

use crate::adapter::{AdapterValidator, ProviderAdapter};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStatus, CircuitState};
use crate::config::{BoundaryConfig, ProviderConfig};
use crate::error::BoundaryError;
use crate::http::{HttpTransport, ReqwestTransport};
use crate::idempotency::IdempotencyResolver;
use crate::pipeline::Pipeline;
use crate::rate_limit::{RateLimiter, RateParams};
use crate::retry::RetryPolicy;
use crate::state_storage::{ErasedStateStorage, StateStorage};
use crate::telemetry::ObservabilitySink;
use std::collections::HashMap;
use std::sync::Arc;

/// A registered provider's breaker, exposed for operational inspection without
/// reaching into the pipeline that owns it.
#[derive(Clone)]
pub struct ProviderHandle {
    circuit_breaker: CircuitBreaker,
}

impl ProviderHandle {
    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn circuit_status(&self) -> CircuitBreakerStatus {
        self.circuit_breaker.status()
    }
}

/// Owns one `Pipeline<S>` per provider. Built via `register_provider` calls, then
/// `start()`ed once, which runs `AdapterValidator` against every registered adapter
/// before any traffic is allowed through.
pub struct BoundaryClient<S> {
    config: BoundaryConfig,
    sink: S,
    transport: Arc<dyn HttpTransport>,
    state_storage: Option<Arc<dyn ErasedStateStorage>>,
    pending: HashMap<String, Arc<dyn ProviderAdapter>>,
    pipelines: HashMap<String, Pipeline<S>>,
    handles: HashMap<String, ProviderHandle>,
    started: bool,
}

impl<S> BoundaryClient<S>
where
    S: ObservabilitySink + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
{
    pub fn new(config: BoundaryConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            transport: Arc::new(ReqwestTransport::new()),
            state_storage: None,
            pending: HashMap::new(),
            pipelines: HashMap::new(),
            handles: HashMap::new(),
            started: false,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Wires a `StateStorage` implementation in, satisfying §4.11's state-storage
    /// requirement for distributed mode (and for local mode without `localUnsafe`).
    pub fn with_state_storage<T>(mut self, storage: T) -> Self
    where
        T: StateStorage + 'static,
    {
        self.state_storage = Some(Arc::new(storage));
        self
    }

    /// Registers an adapter for `name`. Before `start()`, this stashes the adapter to
    /// be built along with the rest at `start()` time. After `start()`, §4.11 requires
    /// it reuse that same build path immediately instead of silently queuing.
    pub async fn register_provider(&mut self, name: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) -> Result<(), BoundaryError> {
        let name = name.into();
        if self.pending.contains_key(&name) || self.pipelines.contains_key(&name) {
            return Err(BoundaryError::DuplicateProvider(name));
        }
        if self.started {
            return self.build_pipeline(name, adapter).await;
        }
        self.pending.insert(name, adapter);
        Ok(())
    }

    /// Validates `config`, validates every registered adapter against its canonical
    /// fixtures, then builds a `Pipeline` per provider. Idempotent failures here are
    /// fatal: a boundary that can't validate its adapters must not start.
    pub async fn start(&mut self) -> Result<(), BoundaryError> {
        self.config.validate(self.state_storage.is_some())?;

        let pending: Vec<(String, Arc<dyn ProviderAdapter>)> = self.pending.drain().collect();
        for (name, adapter) in pending {
            self.build_pipeline(name, adapter).await?;
        }

        self.started = true;
        Ok(())
    }

    /// Validates one adapter and builds its pipeline, shared by `start()`'s initial
    /// sweep and by `register_provider` once the client is already running.
    async fn build_pipeline(&mut self, name: String, adapter: Arc<dyn ProviderAdapter>) -> Result<(), BoundaryError> {
        AdapterValidator::validate(adapter.as_ref()).await?;

        let provider_config = self.config.providers.get(&name).cloned().unwrap_or_default();
        let ProviderConfig { base_url, timeout, retry, circuit_breaker, rate_limit, idempotency, .. } = provider_config;

        let breaker = CircuitBreaker::new(name.clone(), circuit_breaker);
        let limiter = RateLimiter::new(RateParams::new(rate_limit.tokens_per_second, rate_limit.max_tokens), rate_limit.queue_capacity)
            .with_adaptive_backoff(rate_limit.adaptive_backoff);
        let retry_policy = RetryPolicy::builder()
            .max_retries(retry.max_retries)
            .backoff(crate::backoff::Backoff::new(retry.base_delay, retry.max_delay))
            .build();
        let idempotency_resolver = IdempotencyResolver::new(idempotency);
        let redacted_keys = self.config.observability_sanitizer.redacted_keys.clone();

        self.handles.insert(name.clone(), ProviderHandle { circuit_breaker: breaker.clone() });
        self.pipelines.insert(
            name.clone(),
            Pipeline::new(
                name,
                adapter,
                self.transport.clone(),
                breaker,
                limiter,
                retry_policy,
                idempotency_resolver,
                self.sink.clone(),
                timeout,
                base_url,
                redacted_keys,
            ),
        );

        Ok(())
    }

    /// Returns the pipeline registered for `name`. Errors if `start()` hasn't run yet
    /// or `name` was never registered.
    pub fn provider(&self, name: &str) -> Result<&Pipeline<S>, BoundaryError> {
        if !self.started {
            return Err(BoundaryError::NotStarted);
        }
        self.pipelines.get(name).ok_or_else(|| BoundaryError::UnknownProvider(name.to_string()))
    }

    /// Current breaker status `{state, failures, successes, lastFailure?, nextAttempt?}`
    /// for every registered provider, in name order (§6).
    pub fn get_circuit_status(&self) -> Vec<(String, CircuitBreakerStatus)> {
        let mut entries: Vec<(String, CircuitBreakerStatus)> =
            self.handles.iter().map(|(name, handle)| (name.clone(), handle.circuit_status())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AuthToken, RawError, RawRequest, RawResponse, RequestOptions};
    use crate::error::{CanonicalError, ErrorCategory};
    use crate::headers::default_rate_limit_info;
    use crate::idempotency::IdempotencyConfig;
    use crate::normalize::{assemble_meta, NormalizedResponse};
    use crate::pagination::{OpaqueCursorStrategy, PaginationStrategy};
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use serde_json::Value;

    struct StubAdapter;

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn name(&self) -> &str {
            "stub"
        }

        fn build_request(&self, endpoint: &str, options: &RequestOptions, _auth_token: &AuthToken, base_url: Option<&str>) -> Result<RawRequest, CanonicalError> {
            let base = base_url.unwrap_or("https://api.stub.test");
            Ok(RawRequest { url: format!("{base}{endpoint}"), method: "GET".to_string(), headers: HeaderMap::new(), body: options.body.clone() })
        }

        fn parse_response(&self, raw: &RawResponse, request_id: &str) -> NormalizedResponse<Value> {
            NormalizedResponse::new(raw.body.clone(), assemble_meta("stub", request_id, default_rate_limit_info(), None))
        }

        fn parse_error(&self, raw: &RawError) -> CanonicalError {
            CanonicalError::new(ErrorCategory::Provider, "stub", "stub error").with_status(raw.status.unwrap_or(0))
        }

        async fn auth_strategy(&self, _sentinel: Option<&str>) -> Result<AuthToken, CanonicalError> {
            Ok(AuthToken::bearer("stub-token"))
        }

        fn rate_limit_policy(&self, _headers: &HeaderMap) -> crate::normalize::RateLimitInfo {
            default_rate_limit_info()
        }

        async fn pagination_strategy(&self) -> Box<dyn PaginationStrategy> {
            Box::new(OpaqueCursorStrategy::new("next_cursor", "cursor"))
        }

        fn idempotency_config(&self) -> IdempotencyConfig {
            IdempotencyConfig::default()
        }
    }

    #[tokio::test]
    async fn start_validates_and_builds_pipelines() {
        let mut client = BoundaryClient::new(BoundaryConfig::default(), MemorySink::new());
        client.register_provider("stub", Arc::new(StubAdapter)).await.unwrap();
        client.start().await.unwrap();

        assert!(client.provider("stub").is_ok());
        let statuses = client.get_circuit_status();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].0, "stub");
        assert_eq!(statuses[0].1.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn provider_lookup_before_start_fails() {
        let client = BoundaryClient::new(BoundaryConfig::default(), MemorySink::new());
        assert!(matches!(client.provider("stub"), Err(BoundaryError::NotStarted)));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let mut client = BoundaryClient::new(BoundaryConfig::default(), MemorySink::new());
        client.register_provider("stub", Arc::new(StubAdapter)).await.unwrap();
        let err = client.register_provider("stub", Arc::new(StubAdapter)).await.unwrap_err();
        assert!(matches!(err, BoundaryError::DuplicateProvider(_)));
    }

    #[tokio::test]
    async fn registering_after_start_builds_the_pipeline_immediately() {
        let mut client = BoundaryClient::new(BoundaryConfig::default(), MemorySink::new());
        client.start().await.unwrap();

        client.register_provider("stub", Arc::new(StubAdapter)).await.unwrap();

        assert!(client.provider("stub").is_ok());
        let statuses = client.get_circuit_status();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].0, "stub");
    }
}
