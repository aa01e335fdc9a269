//! The provider adapter contract (§4.1): the only place vendor request/response shapes
//! are interpreted. The pipeline never branches on provider identity; it only ever
//! calls through this trait.

use crate::error::{AdapterValidationError, CanonicalError};
use crate::idempotency::IdempotencyConfig;
use crate::normalize::{NormalizedResponse, RateLimitInfo};
use crate::pagination::PaginationStrategy;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Token the validator passes to `authStrategy` during startup. Recognizing it (and
/// short-circuiting without side effects) is part of the adapter contract.
pub const VALIDATION_SENTINEL: &str = "__boundary_validation_sentinel__";

/// How the resolved token is attached to a request: header name plus value. Most
/// providers use `Authorization: Bearer <token>`; some use a custom header.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    pub header_name: String,
    pub header_value: String,
}

impl AuthToken {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self { header_name: "authorization".to_string(), header_value: format!("Bearer {}", token.into()) }
    }

    pub fn custom_header(header_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { header_name: header_name.into(), header_value: value.into() }
    }
}

/// Caller-supplied per-call options: headers, query params, a body to serialize, an
/// optional explicit idempotency key, and an optional per-request timeout override.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub idempotency_key: Option<String>,
    pub timeout: Option<Duration>,
}

/// The result of `buildRequest`: everything the HTTP layer needs, with nothing left
/// for it to decide.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub url: String,
    pub method: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

/// A successfully received HTTP response, handed to `parseResponse`.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Value,
}

/// A non-2xx response (or a transport-level failure with no status), handed to
/// `parseError`. `status` is `None` for failures that never reached the wire.
#[derive(Debug, Clone)]
pub struct RawError {
    pub status: Option<u16>,
    pub headers: HeaderMap,
    pub body: Value,
}

/// A closed capability set per provider (§4.1). `buildRequest`, `parseResponse`,
/// `parseError`, and `rateLimitPolicy` are pure/synchronous: no I/O, so no reason to
/// force them through the executor. `authStrategy` may suspend (refresh-token
/// exchange); `paginationStrategy` is `async` only so a trait object can be built
/// uniformly, not because it does any actual waiting.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registered provider name; `parseResponse`'s `meta.provider` must match this.
    fn name(&self) -> &str;

    fn build_request(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        auth_token: &AuthToken,
        base_url: Option<&str>,
    ) -> Result<RawRequest, CanonicalError>;

    fn parse_response(&self, raw: &RawResponse, request_id: &str) -> NormalizedResponse<Value>;

    fn parse_error(&self, raw: &RawError) -> CanonicalError;

    /// `sentinel` is `Some(VALIDATION_SENTINEL)` only during startup validation; an
    /// adapter must recognize it and return immediately without performing any real
    /// credential exchange.
    async fn auth_strategy(&self, sentinel: Option<&str>) -> Result<AuthToken, CanonicalError>;

    fn rate_limit_policy(&self, headers: &HeaderMap) -> RateLimitInfo;

    async fn pagination_strategy(&self) -> Box<dyn PaginationStrategy>;

    fn idempotency_config(&self) -> IdempotencyConfig;
}

/// Runs canonical fixtures against an adapter at startup (§4.1) and rejects one whose
/// outputs violate the contract. Validation failure is always fatal.
pub struct AdapterValidator;

impl AdapterValidator {
    pub async fn validate(adapter: &dyn ProviderAdapter) -> Result<(), AdapterValidationError> {
        Self::validate_parse_response(adapter)?;
        Self::validate_parse_error(adapter)?;
        Self::validate_auth_strategy(adapter).await?;
        Ok(())
    }

    fn validate_parse_response(adapter: &dyn ProviderAdapter) -> Result<(), AdapterValidationError> {
        let raw = RawResponse { status: 200, headers: HeaderMap::new(), body: serde_json::json!({"ok": true}) };
        let response = adapter.parse_response(&raw, "validation-request-id");
        if response.meta.provider != adapter.name() {
            return Err(AdapterValidationError::WrongProviderName {
                provider: adapter.name().to_string(),
                got: response.meta.provider,
            });
        }
        Ok(())
    }

    fn validate_parse_error(adapter: &dyn ProviderAdapter) -> Result<(), AdapterValidationError> {
        let raw = RawError { status: Some(500), headers: HeaderMap::new(), body: serde_json::json!({"message": "boom"}) };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| adapter.parse_error(&raw)));
        let canonical = result.map_err(|_| {
            AdapterValidationError::ParseErrorPanicked(adapter.name().to_string(), "panic during parseError".to_string())
        })?;

        if let Some(metadata) = &canonical.metadata {
            if let Value::Object(map) = metadata {
                for vendor_only_field in ["raw_status", "__vendor__"] {
                    if map.contains_key(vendor_only_field) {
                        return Err(AdapterValidationError::VendorFieldLeaked(
                            adapter.name().to_string(),
                            vendor_only_field.to_string(),
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    async fn validate_auth_strategy(adapter: &dyn ProviderAdapter) -> Result<(), AdapterValidationError> {
        adapter
            .auth_strategy(Some(VALIDATION_SENTINEL))
            .await
            .map(|_| ())
            .map_err(|_| AdapterValidationError::SentinelNotRecognized(adapter.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::normalize::assemble_meta;
    use crate::pagination::OpaqueCursorStrategy;

    struct FixtureAdapter {
        name: String,
    }

    #[async_trait]
    impl ProviderAdapter for FixtureAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn build_request(
            &self,
            endpoint: &str,
            options: &RequestOptions,
            auth_token: &AuthToken,
            base_url: Option<&str>,
        ) -> Result<RawRequest, CanonicalError> {
            let base = base_url.unwrap_or("https://api.example.com");
            let mut url = format!("{base}{endpoint}");
            if !options.query.is_empty() {
                let qs: Vec<String> = options.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
                url = format!("{url}?{}", qs.join("&"));
            }
            let mut headers = HeaderMap::new();
            headers.insert(
                reqwest::header::HeaderName::from_bytes(auth_token.header_name.as_bytes()).unwrap(),
                auth_token.header_value.parse().unwrap(),
            );
            Ok(RawRequest { url, method: "GET".to_string(), headers, body: options.body.clone() })
        }

        fn parse_response(&self, raw: &RawResponse, request_id: &str) -> NormalizedResponse<Value> {
            let rl = self.rate_limit_policy(&raw.headers);
            let meta = assemble_meta(&self.name, request_id, rl, None);
            NormalizedResponse::new(raw.body.clone(), meta)
        }

        fn parse_error(&self, raw: &RawError) -> CanonicalError {
            CanonicalError::new(ErrorCategory::Provider, &self.name, "fixture error")
                .with_status(raw.status.unwrap_or(0))
        }

        async fn auth_strategy(&self, _sentinel: Option<&str>) -> Result<AuthToken, CanonicalError> {
            Ok(AuthToken::bearer("fixture-token"))
        }

        fn rate_limit_policy(&self, _headers: &HeaderMap) -> RateLimitInfo {
            crate::headers::default_rate_limit_info()
        }

        async fn pagination_strategy(&self) -> Box<dyn PaginationStrategy> {
            Box::new(OpaqueCursorStrategy::new("next_cursor", "cursor"))
        }

        fn idempotency_config(&self) -> IdempotencyConfig {
            IdempotencyConfig::default()
        }
    }

    #[tokio::test]
    async fn validator_accepts_a_well_behaved_adapter() {
        let adapter = FixtureAdapter { name: "fixture".to_string() };
        AdapterValidator::validate(&adapter).await.unwrap();
    }

    #[tokio::test]
    async fn validator_rejects_wrong_provider_name() {
        struct WrongName;

        #[async_trait]
        impl ProviderAdapter for WrongName {
            fn name(&self) -> &str {
                "wrong-name"
            }
            fn build_request(
                &self,
                _endpoint: &str,
                _options: &RequestOptions,
                _auth_token: &AuthToken,
                _base_url: Option<&str>,
            ) -> Result<RawRequest, CanonicalError> {
                unreachable!()
            }
            fn parse_response(&self, _raw: &RawResponse, request_id: &str) -> NormalizedResponse<Value> {
                let rl = crate::headers::default_rate_limit_info();
                let meta = assemble_meta("other-provider", request_id, rl, None);
                NormalizedResponse::new(Value::Null, meta)
            }
            fn parse_error(&self, raw: &RawError) -> CanonicalError {
                CanonicalError::new(ErrorCategory::Provider, "wrong-name", "err").with_status(raw.status.unwrap_or(0))
            }
            async fn auth_strategy(&self, _sentinel: Option<&str>) -> Result<AuthToken, CanonicalError> {
                Ok(AuthToken::bearer("t"))
            }
            fn rate_limit_policy(&self, _headers: &HeaderMap) -> RateLimitInfo {
                crate::headers::default_rate_limit_info()
            }
            async fn pagination_strategy(&self) -> Box<dyn PaginationStrategy> {
                Box::new(OpaqueCursorStrategy::new("next_cursor", "cursor"))
            }
            fn idempotency_config(&self) -> IdempotencyConfig {
                IdempotencyConfig::default()
            }
        }

        let err = AdapterValidator::validate(&WrongName).await.unwrap_err();
        assert!(matches!(err, AdapterValidationError::WrongProviderName { .. }));
    }

    #[tokio::test]
    async fn validator_rejects_vendor_field_leak() {
        struct LeakyAdapter;

        #[async_trait]
        impl ProviderAdapter for LeakyAdapter {
            fn name(&self) -> &str {
                "leaky"
            }
            fn build_request(
                &self,
                _endpoint: &str,
                _options: &RequestOptions,
                _auth_token: &AuthToken,
                _base_url: Option<&str>,
            ) -> Result<RawRequest, CanonicalError> {
                unreachable!()
            }
            fn parse_response(&self, _raw: &RawResponse, request_id: &str) -> NormalizedResponse<Value> {
                let rl = crate::headers::default_rate_limit_info();
                let meta = assemble_meta("leaky", request_id, rl, None);
                NormalizedResponse::new(Value::Null, meta)
            }
            fn parse_error(&self, raw: &RawError) -> CanonicalError {
                CanonicalError::new(ErrorCategory::Provider, "leaky", "err")
                    .with_status(raw.status.unwrap_or(0))
                    .with_metadata(serde_json::json!({"raw_status": 500}))
            }
            async fn auth_strategy(&self, _sentinel: Option<&str>) -> Result<AuthToken, CanonicalError> {
                Ok(AuthToken::bearer("t"))
            }
            fn rate_limit_policy(&self, _headers: &HeaderMap) -> RateLimitInfo {
                crate::headers::default_rate_limit_info()
            }
            async fn pagination_strategy(&self) -> Box<dyn PaginationStrategy> {
                Box::new(OpaqueCursorStrategy::new("next_cursor", "cursor"))
            }
            fn idempotency_config(&self) -> IdempotencyConfig {
                IdempotencyConfig::default()
            }
        }

        let err = AdapterValidator::validate(&LeakyAdapter).await.unwrap_err();
        assert!(matches!(err, AdapterValidationError::VendorFieldLeaked(_, _)));
    }

    #[tokio::test]
    async fn validator_rejects_adapter_that_ignores_the_sentinel() {
        struct DoesLiveAuthRegardless;

        #[async_trait]
        impl ProviderAdapter for DoesLiveAuthRegardless {
            fn name(&self) -> &str {
                "oblivious"
            }
            fn build_request(
                &self,
                _endpoint: &str,
                _options: &RequestOptions,
                _auth_token: &AuthToken,
                _base_url: Option<&str>,
            ) -> Result<RawRequest, CanonicalError> {
                unreachable!()
            }
            fn parse_response(&self, _raw: &RawResponse, request_id: &str) -> NormalizedResponse<Value> {
                let rl = crate::headers::default_rate_limit_info();
                let meta = assemble_meta("oblivious", request_id, rl, None);
                NormalizedResponse::new(Value::Null, meta)
            }
            fn parse_error(&self, raw: &RawError) -> CanonicalError {
                CanonicalError::new(ErrorCategory::Provider, "oblivious", "err").with_status(raw.status.unwrap_or(0))
            }
            async fn auth_strategy(&self, sentinel: Option<&str>) -> Result<AuthToken, CanonicalError> {
                if sentinel.is_some() {
                    return Err(CanonicalError::new(ErrorCategory::Auth, "oblivious", "no credentials configured"));
                }
                Ok(AuthToken::bearer("t"))
            }
            fn rate_limit_policy(&self, _headers: &HeaderMap) -> RateLimitInfo {
                crate::headers::default_rate_limit_info()
            }
            async fn pagination_strategy(&self) -> Box<dyn PaginationStrategy> {
                Box::new(OpaqueCursorStrategy::new("next_cursor", "cursor"))
            }
            fn idempotency_config(&self) -> IdempotencyConfig {
                IdempotencyConfig::default()
            }
        }

        let err = AdapterValidator::validate(&DoesLiveAuthRegardless).await.unwrap_err();
        assert!(matches!(err, AdapterValidationError::SentinelNotRecognized(_)));
    }
}
