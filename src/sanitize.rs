//! Three parallel redaction layers (§4.8). Each returns a new value; none mutate
//! their input, so the transport and the caller always see the untouched original.

use serde_json::Value;
use std::collections::BTreeMap;

pub const DEFAULT_REDACTED_KEYS: &[&str] =
    &["authorization", "cookie", "token", "apikey", "api_key", "body"];

const ERROR_METADATA_SENSITIVE_TERMS: &[&str] = &[
    "password",
    "secret",
    "token",
    "apikey",
    "api_key",
    "authorization",
    "cookie",
    "session",
    "credentials",
    "private_key",
    "access_token",
    "refresh_token",
];

const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

fn normalize_key(key: &str) -> String {
    key.to_lowercase().replace(['-', '_'], "")
}

fn key_matches_any(key: &str, terms: &[String]) -> bool {
    let normalized = normalize_key(key);
    terms.iter().any(|t| normalized.contains(t.as_str()))
}

/// A sanitized, deep copy of request headers and query params. Body is replaced
/// wholesale with `"[REDACTED]"` when `"body"` is among the redacted keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizedRequest {
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
}

/// Deep-walks headers and query params, redacting any key whose normalized form
/// contains a redacted term, or whose value (lower-cased) contains one.
pub fn sanitize_request(
    headers: &BTreeMap<String, String>,
    query: &BTreeMap<String, String>,
    body: Option<&Value>,
    extra_redacted_keys: &[String],
) -> SanitizedRequest {
    let terms: Vec<String> = DEFAULT_REDACTED_KEYS
        .iter()
        .map(|s| s.to_string())
        .chain(extra_redacted_keys.iter().map(|s| s.to_lowercase()))
        .collect();

    let redact_pair = |k: &str, v: &str| -> String {
        if key_matches_any(k, &terms) || terms.iter().any(|t| v.to_lowercase().contains(t.as_str())) {
            REDACTED_PLACEHOLDER.to_string()
        } else {
            v.to_string()
        }
    };

    let headers = headers.iter().map(|(k, v)| (k.clone(), redact_pair(k, v))).collect();
    let query = query.iter().map(|(k, v)| (k.clone(), redact_pair(k, v))).collect();
    let body_is_redacted_key = terms.iter().any(|t| t == "body");
    let body = body.map(|b| if body_is_redacted_key { Value::String(REDACTED_PLACEHOLDER.to_string()) } else { b.clone() });

    SanitizedRequest { headers, query, body }
}

/// Recursively walks error metadata; any key whose lower-case form contains a
/// sensitive term is replaced. Arrays and non-object leaves pass through unchanged.
pub fn sanitize_error_metadata(value: &Value) -> Value {
    sanitize_value(value, ERROR_METADATA_SENSITIVE_TERMS, MatchMode::KeyOnly)
}

/// Variant used for observability payloads (metric tags, on-log error metadata):
/// redaction triggers on either the key or the value matching.
pub fn sanitize_observability(value: &Value, extra_redacted_keys: &[String]) -> Value {
    let owned: Vec<String> = ERROR_METADATA_SENSITIVE_TERMS
        .iter()
        .map(|s| s.to_string())
        .chain(extra_redacted_keys.iter().map(|s| s.to_lowercase()))
        .collect();
    let terms: Vec<&str> = owned.iter().map(|s| s.as_str()).collect();
    sanitize_value(value, &terms, MatchMode::KeyOrValue)
}

#[derive(Clone, Copy)]
enum MatchMode {
    KeyOnly,
    KeyOrValue,
}

fn sanitize_value(value: &Value, terms: &[&str], mode: MatchMode) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let key_hit = terms.iter().any(|t| k.to_lowercase().contains(t));
                let value_hit = matches!(mode, MatchMode::KeyOrValue) && value_contains_term(v, terms);
                if key_hit || value_hit {
                    out.insert(k.clone(), Value::String(REDACTED_PLACEHOLDER.to_string()));
                } else {
                    out.insert(k.clone(), sanitize_value(v, terms, mode));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| sanitize_value(v, terms, mode)).collect()),
        other => other.clone(),
    }
}

fn value_contains_term(value: &Value, terms: &[&str]) -> bool {
    match value {
        Value::String(s) => {
            let lower = s.to_lowercase();
            terms.iter().any(|t| lower.contains(t))
        }
        _ => false,
    }
}
