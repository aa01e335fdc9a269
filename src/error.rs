//! Canonical error taxonomy and the crate's leaf error types.
//!
//! `CanonicalError` is the one error shape that ever crosses the pipeline boundary to a
//! caller. Its `code` is a pure function of `(category, status)` (see [`derive_code`]), and
//! its retryability is a fixed function of `code` (see [`retryable_for_code`]); neither is
//! ever set ad hoc by calling code.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

/// Upper bound on how many prior-attempt messages a retry sequence keeps, to
/// avoid unbounded growth across a long retry sequence.
pub const MAX_RETRY_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Auth,
    RateLimit,
    Network,
    Provider,
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Auth => "auth",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Network => "network",
            ErrorCategory::Provider => "provider",
            ErrorCategory::Validation => "validation",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthFailed,
    RateLimited,
    NotFound,
    BadRequest,
    Upstream5xx,
    NetworkError,
    Timeout,
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Upstream5xx => "UPSTREAM_5XX",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// `code` is a pure function of `(category, status)`. This table is frozen by
/// contract; changing it anywhere other than here is a breaking change.
pub fn derive_code(category: ErrorCategory, status: Option<u16>) -> ErrorCode {
    match (category, status) {
        (ErrorCategory::Auth, _) => ErrorCode::AuthFailed,
        (ErrorCategory::RateLimit, _) => ErrorCode::RateLimited,
        (ErrorCategory::Network, _) => ErrorCode::NetworkError,
        (ErrorCategory::Validation, Some(404)) => ErrorCode::NotFound,
        (ErrorCategory::Validation, _) => ErrorCode::BadRequest,
        (ErrorCategory::Provider, Some(s)) if s >= 500 => ErrorCode::Upstream5xx,
        _ => ErrorCode::Unknown,
    }
}

/// Retryability per code is frozen (§7): NETWORK_ERROR, TIMEOUT, UPSTREAM_5XX, RATE_LIMITED
/// are retryable; everything else is not.
pub fn retryable_for_code(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::NetworkError
            | ErrorCode::Timeout
            | ErrorCode::Upstream5xx
            | ErrorCode::RateLimited
    )
}

/// Best-effort inference used only when an adapter's `parseError` left `category`
/// unset or invalid (§4.7). Adapters that are explicit about category are never
/// second-guessed.
pub fn infer_category(status: Option<u16>, message: &str) -> ErrorCategory {
    match status {
        Some(401) | Some(403) => ErrorCategory::Auth,
        Some(429) => ErrorCategory::RateLimit,
        Some(s) if s >= 500 => ErrorCategory::Provider,
        Some(s) if s >= 400 => ErrorCategory::Validation,
        _ => {
            let lower = message.to_lowercase();
            if lower.contains("timeout") || lower.contains("econnreset") || lower.contains("enotfound")
            {
                ErrorCategory::Network
            } else {
                ErrorCategory::Provider
            }
        }
    }
}

/// The one error shape that ever reaches a caller of a provider method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalError {
    pub message: String,
    pub category: ErrorCategory,
    pub code: ErrorCode,
    pub retryable: bool,
    pub provider: String,
    pub request_id: String,
    pub status: Option<u16>,
    pub metadata: Option<serde_json::Value>,
    #[serde(with = "retry_after_serde")]
    pub retry_after: Option<SystemTime>,
}

mod retry_after_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(v: &Option<SystemTime>, s: S) -> Result<S::Ok, S::Error> {
        let secs = v.map(|t| t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64());
        secs.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SystemTime>, D::Error> {
        let secs: Option<f64> = Option::deserialize(d)?;
        Ok(secs.map(|s| UNIX_EPOCH + Duration::from_secs_f64(s)))
    }
}

impl CanonicalError {
    pub fn new(
        category: ErrorCategory,
        provider: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let code = derive_code(category, None);
        Self {
            message: message.into(),
            category,
            code,
            retryable: retryable_for_code(code),
            provider: provider.into(),
            request_id: String::new(),
            status: None,
            metadata: None,
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self.code = derive_code(self.category, Some(status));
        self.retryable = retryable_for_code(self.code);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_retry_after(mut self, at: SystemTime) -> Self {
        self.retry_after = Some(at);
        self
    }

    /// The dedicated, type-recognizable circuit-breaker short-circuit error (§4.2).
    pub fn circuit_open(
        provider: impl Into<String>,
        request_id: impl Into<String>,
        next_attempt: SystemTime,
    ) -> Self {
        Self::new(ErrorCategory::Provider, provider, "Circuit breaker is OPEN")
            .with_request_id(request_id)
            .with_retry_after(next_attempt)
    }

    pub fn is_circuit_open(&self) -> bool {
        self.category == ErrorCategory::Provider && self.message.contains("Circuit breaker is OPEN")
    }
}

impl fmt::Display for CanonicalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}] {} (provider={}, request_id={})",
            self.category, self.code, self.message, self.provider, self.request_id
        )
    }
}

impl std::error::Error for CanonicalError {}

/// Accumulates prior failures across a retry sequence; capped at
/// [`MAX_RETRY_HISTORY`] so a long sequence of retries doesn't grow this unbounded.
pub fn push_retry_history(history: &mut Vec<CanonicalError>, err: CanonicalError) {
    history.push(err);
    if history.len() > MAX_RETRY_HISTORY {
        let excess = history.len() - MAX_RETRY_HISTORY;
        history.drain(0..excess);
    }
}

/// Config validation failures, raised synchronously from `BoundaryConfig::validate`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("provider '{0}' has no adapter and no built-in adapter is registered for that name")]
    NoAdapter(String),
    #[error("circuit breaker failure_threshold must be > 0 (provider '{0}')")]
    InvalidFailureThreshold(String),
    #[error("rate limit tokensPerSecond must be > 0 (provider '{0}')")]
    InvalidTokensPerSecond(String),
    #[error("rate limit maxTokens must be >= 1 (provider '{0}')")]
    InvalidMaxTokens(String),
    #[error("retry maxRetries must be >= 0 (provider '{0}')")]
    NegativeMaxRetries(String),
    #[error("distributed mode requires a state storage implementation")]
    DistributedModeRequiresStateStorage,
    #[error("local mode without state storage requires localUnsafe = true")]
    LocalModeRequiresStateStorageOrUnsafe,
}

/// Raised by the adapter validator at startup (§4.1); always fatal.
#[derive(Debug, thiserror::Error)]
pub enum AdapterValidationError {
    #[error("adapter '{provider}' parseResponse.meta.provider was '{got}', expected '{provider}'")]
    WrongProviderName { provider: String, got: String },
    #[error("adapter '{0}' parseError returned a non-canonical category")]
    NonCanonicalCategory(String),
    #[error("adapter '{0}' parseError left a vendor-specific top-level field: '{1}'")]
    VendorFieldLeaked(String, String),
    #[error("adapter '{0}' authStrategy did not recognize the validation sentinel token")]
    SentinelNotRecognized(String),
    #[error("adapter '{0}' parseError panicked during validation: {1}")]
    ParseErrorPanicked(String, String),
}

/// Raised by the pagination iterator (§4.6).
#[derive(Debug, thiserror::Error)]
pub enum PaginationError {
    #[error("pagination cycle detected at cursor '{0}'")]
    CycleDetected(String),
    #[error("pagination exceeded the hard cap of {0} pages")]
    PageCapExceeded(usize),
    #[error("page fetch failed: {0}")]
    Fetch(#[from] CanonicalError),
}

/// Raised directly by the rate limiter (not funneled through `CanonicalError`'s
/// adapter-facing path, since it never involves an adapter).
#[derive(Debug, thiserror::Error)]
pub enum RateLimiterError {
    #[error("rate limit queue is full")]
    QueueFull,
    #[error("Rate limiter was reset")]
    Reset,
}

/// Top-level lifecycle errors (§4.11): "any method invoked before start completes
/// throws a fixed error."
#[derive(Debug, thiserror::Error)]
pub enum BoundaryError {
    #[error("BoundaryClient has not completed start() yet")]
    NotStarted,
    #[error("provider '{0}' is not registered")]
    UnknownProvider(String),
    #[error("provider '{0}' is already registered")]
    DuplicateProvider(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    AdapterValidation(#[from] AdapterValidationError),
}

#[derive(Debug, Clone, Default)]
pub struct ErrorMetadataBuilder {
    entries: HashMap<String, serde_json::Value>,
}

impl ErrorMetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> serde_json::Value {
        serde_json::Value::Object(self.entries.into_iter().collect())
    }
}
