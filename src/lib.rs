#![forbid(unsafe_code)]

//! # boundary
//!
//! A client-side resilience gateway for outbound calls to third-party REST
//! providers. Fronts each provider behind one stable, provider-agnostic contract:
//! auth, rate limiting, circuit breaking, idempotency-gated retry, HTTP execution
//! with a deadline, response/error normalization, pagination, and sanitized
//! observability, all composed into a single [`pipeline::Pipeline::execute`] call.
//!
//! ## Building a boundary
//!
//! Implement [`adapter::ProviderAdapter`] for each provider, register it with a
//! [`registry::BoundaryClient`], `start()` it (which validates every adapter against
//! its canonical fixtures), and call `execute` through the returned pipeline handle.
//!
//! ```rust,no_run
//! use boundary::prelude::*;
//! use std::sync::Arc;
//!
//! # struct MyAdapter;
//! # #[async_trait::async_trait]
//! # impl ProviderAdapter for MyAdapter {
//! #     fn name(&self) -> &str { "example" }
//! #     fn build_request(&self, _: &str, _: &RequestOptions, _: &AuthToken, _: Option<&str>) -> Result<RawRequest, CanonicalError> { unimplemented!() }
//! #     fn parse_response(&self, _: &RawResponse, _: &str) -> NormalizedResponse<serde_json::Value> { unimplemented!() }
//! #     fn parse_error(&self, _: &RawError) -> CanonicalError { unimplemented!() }
//! #     async fn auth_strategy(&self, _: Option<&str>) -> Result<AuthToken, CanonicalError> { unimplemented!() }
//! #     fn rate_limit_policy(&self, _: &reqwest::header::HeaderMap) -> RateLimitInfo { unimplemented!() }
//! #     async fn pagination_strategy(&self) -> Box<dyn PaginationStrategy> { unimplemented!() }
//! #     fn idempotency_config(&self) -> IdempotencyConfig { IdempotencyConfig::default() }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = BoundaryClient::new(BoundaryConfig::default(), NullSink);
//!     client.register_provider("example", Arc::new(MyAdapter)).await?;
//!     client.start().await?;
//!
//!     let pipeline = client.provider("example")?;
//!     let _response: NormalizedResponse<serde_json::Value> =
//!         pipeline.execute("GET", "/widgets/1", RequestOptions::default()).await?;
//!     Ok(())
//! }
//! ```

mod adaptive;
mod adapter;
mod backoff;
mod circuit_breaker;
mod clock;
mod config;
mod error;
mod headers;
mod http;
mod idempotency;
mod jitter;
mod normalize;
mod pagination;
mod pipeline;
mod rate_limit;
mod registry;
mod retry;
mod sanitize;
mod schema;
mod sleeper;
mod state_storage;
mod telemetry;

pub use adapter::{
    AdapterValidator, AuthToken, ProviderAdapter, RawError, RawRequest, RawResponse, RequestOptions, VALIDATION_SENTINEL,
};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitState};
pub use config::{BoundaryConfig, Mode, ObservabilitySanitizerConfig, ProviderConfig, RateLimitConfig, RetryConfig};
pub use error::{
    AdapterValidationError, BoundaryError, CanonicalError, ConfigError, ErrorCategory, ErrorCode, PaginationError,
    RateLimiterError,
};
pub use http::{FakeTransport, HttpTransport, ReqwestTransport};
pub use idempotency::{IdempotencyConfig, IdempotencyLevel};
pub use normalize::{NormalizedResponse, PaginationInfo, RateLimitInfo, ResponseMeta};
pub use pagination::{LinkHeaderStrategy, OffsetStrategy, OpaqueCursorStrategy, Page, PageStream, PaginationStrategy};
pub use pipeline::{Pipeline, DEFAULT_TIMEOUT};
pub use registry::{BoundaryClient, ProviderHandle};
pub use schema::{NoopSchemaStore, SchemaStore};
#[cfg(feature = "schema-validation")]
pub use schema::JsonSchemaStore;
pub use state_storage::{NoopStateStorage, StateStorage};
pub use telemetry::{BoundaryEvent, ErrorContext, LogSink, MemorySink, NullSink, ObservabilitySink, RequestContext, ResponseContext, StreamingSink};

pub mod prelude;
