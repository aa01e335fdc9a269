//! HTTP execution boundary (§4.9 step 7): sends a [`RawRequest`], applies a deadline,
//! and returns either a parsed [`RawResponse`] or a structured [`RawError`] for the
//! adapter to interpret. Never called directly by a user; only by `Pipeline`.

use crate::adapter::{RawError, RawRequest, RawResponse};
use crate::error::{CanonicalError, ErrorCategory};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::time::Duration;

/// Abstracts the wire so `Pipeline` can be driven by a [`FakeTransport`] in tests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: RawRequest, timeout: Duration) -> Result<RawResponse, CanonicalError>;
}

/// The production transport, backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self { client: reqwest::Client::builder().build().expect("reqwest client builds with default config") }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: RawRequest, timeout: Duration) -> Result<RawResponse, CanonicalError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| CanonicalError::new(ErrorCategory::Validation, "", format!("invalid HTTP method '{}'", request.method)))?;

        let mut builder = self.client.request(method, &request.url).headers(request.headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let outcome = tokio::time::timeout(timeout, builder.send()).await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(network_error(&e.to_string()));
            }
            Err(_) => {
                return Err(timeout_error(timeout));
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let raw_bytes = response.bytes().await.map_err(|e| network_error(&e.to_string()))?;
        let body = parse_body(&headers, raw_bytes.as_ref());

        if (200..300).contains(&status) {
            Ok(RawResponse { status, headers, body })
        } else {
            Err(structured_status_error(status, headers, body))
        }
    }
}

fn parse_body(headers: &HeaderMap, bytes: &[u8]) -> Value {
    let declares_json = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false);

    if declares_json {
        serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
    } else {
        match std::str::from_utf8(bytes) {
            Ok(s) if s.is_empty() => Value::Null,
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Null,
        }
    }
}

fn network_error(message: &str) -> CanonicalError {
    CanonicalError::new(ErrorCategory::Network, "", message)
}

fn timeout_error(timeout: Duration) -> CanonicalError {
    CanonicalError::new(ErrorCategory::Network, "", format!("Request timeout after {}ms", timeout.as_millis()))
}

/// §4.9 step 7: a non-2xx response is not itself an error; it's handed back to the
/// adapter's `parseError` as a structured `{status, headers, body}` value. This
/// function exists only to carry that value through `HttpTransport::send`'s
/// `Result` shape; `Pipeline` unwraps it again before calling the adapter.
fn structured_status_error(status: u16, headers: HeaderMap, body: Value) -> CanonicalError {
    CanonicalError::new(ErrorCategory::Provider, "", "non-2xx response")
        .with_status(status)
        .with_metadata(serde_json::json!({
            "raw_headers": headers.iter().filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string()))).collect::<std::collections::BTreeMap<_, _>>(),
            "raw_body": body,
        }))
}

/// Recovers the structured `(status, headers, body)` set from `structured_status_error`,
/// for `Pipeline` to hand to the adapter's `parseError`.
pub fn as_raw_error(err: &CanonicalError) -> RawError {
    let headers = err
        .metadata
        .as_ref()
        .and_then(|m| m.get("raw_headers"))
        .and_then(|h| h.as_object())
        .map(|obj| {
            let mut map = HeaderMap::new();
            for (k, v) in obj {
                if let (Ok(name), Some(value)) = (
                    reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                    v.as_str().and_then(|s| s.parse().ok()),
                ) {
                    map.insert(name, value);
                }
            }
            map
        })
        .unwrap_or_default();

    let body = err.metadata.as_ref().and_then(|m| m.get("raw_body")).cloned().unwrap_or(Value::Null);

    RawError { status: err.status, headers, body }
}

/// A deterministic, in-memory transport for tests: returns canned responses keyed by
/// call order, never touches a real socket.
#[derive(Clone, Default)]
pub struct FakeTransport {
    responses: std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<Result<RawResponse, CanonicalError>>>>,
    requests: std::sync::Arc<std::sync::Mutex<Vec<RawRequest>>>,
    timeouts: std::sync::Arc<std::sync::Mutex<Vec<Duration>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: RawResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, error: CanonicalError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<RawRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The `timeout` argument `Pipeline` passed on each `send` call, in call order.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: RawRequest, timeout: Duration) -> Result<RawResponse, CanonicalError> {
        self.requests.lock().unwrap().push(request);
        self.timeouts.lock().unwrap().push(timeout);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CanonicalError::new(ErrorCategory::Provider, "", "FakeTransport has no queued response")))
    }
}
