//! Convenient re-exports for the common path: implement `ProviderAdapter`, register
//! it with `BoundaryClient`, call `execute`.
pub use crate::{
    AdapterValidationError, AdapterValidator, AuthToken, BoundaryClient, BoundaryConfig, BoundaryError, BoundaryEvent,
    CanonicalError, CircuitBreakerConfig, CircuitState, ConfigError, ErrorCategory, ErrorCode, IdempotencyConfig,
    IdempotencyLevel, LinkHeaderStrategy, LogSink, MemorySink, Mode, NoopSchemaStore, NoopStateStorage,
    NormalizedResponse, NullSink, OffsetStrategy, OpaqueCursorStrategy, Page, PageStream, PaginationError,
    PaginationInfo, PaginationStrategy, Pipeline, ProviderAdapter, ProviderConfig, ProviderHandle, RateLimitConfig,
    RateLimitInfo, RateLimiterError, RawError, RawRequest, RawResponse, RequestOptions, ResponseMeta, RetryConfig,
    SchemaStore, StateStorage, VALIDATION_SENTINEL,
};
