//! Maps `(method, endpoint)` to an [`IdempotencyLevel`] (§4.4).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyLevel {
    Safe,
    Idempotent,
    Conditional,
    Unsafe,
}

impl IdempotencyLevel {
    /// A failed call at this level may be retried, given `has_key` for CONDITIONAL.
    pub fn permits_retry(self, has_key: bool) -> bool {
        match self {
            IdempotencyLevel::Safe | IdempotencyLevel::Idempotent => true,
            IdempotencyLevel::Conditional => has_key,
            IdempotencyLevel::Unsafe => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub default_safe_operations: Vec<String>,
    pub operation_overrides: IndexMap<String, IdempotencyLevel>,
    pub default_level: IdempotencyLevel,
    pub auto_generate_keys: bool,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            default_safe_operations: vec!["GET".to_string(), "HEAD".to_string(), "OPTIONS".to_string()],
            operation_overrides: IndexMap::new(),
            default_level: IdempotencyLevel::Safe,
            auto_generate_keys: false,
        }
    }
}

/// Resolves `(method, endpoint)` pairs to an idempotency level per the lookup order in
/// §4.4: exact match in overrides, then first-found pattern match, then
/// `defaultSafeOperations`, then the configured default.
#[derive(Clone)]
pub struct IdempotencyResolver {
    config: IdempotencyConfig,
}

impl IdempotencyResolver {
    pub fn new(config: IdempotencyConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, method: &str, endpoint: &str) -> IdempotencyLevel {
        let key = format!("{method} {endpoint}");

        if let Some(level) = self.config.operation_overrides.get(&key) {
            return *level;
        }

        for (pattern, level) in &self.config.operation_overrides {
            if pattern_matches(pattern, &key) {
                return *level;
            }
        }

        if self.config.default_safe_operations.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            return IdempotencyLevel::Safe;
        }

        self.config.default_level
    }
}

/// `pattern` and `key` are both `"<METHOD> <endpoint>"` strings; endpoint segments in
/// `pattern` beginning with `:` match any single non-slash run in `key`.
fn pattern_matches(pattern: &str, key: &str) -> bool {
    let (p_method, p_path) = match pattern.split_once(' ') {
        Some(parts) => parts,
        None => return false,
    };
    let (k_method, k_path) = match key.split_once(' ') {
        Some(parts) => parts,
        None => return false,
    };
    if !p_method.eq_ignore_ascii_case(k_method) {
        return false;
    }

    let p_segments: Vec<&str> = p_path.split('/').collect();
    let k_segments: Vec<&str> = k_path.split('/').collect();
    if p_segments.len() != k_segments.len() {
        return false;
    }
    p_segments
        .iter()
        .zip(k_segments.iter())
        .all(|(p, k)| p.starts_with(':') || p == k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with_overrides(overrides: &[(&str, IdempotencyLevel)]) -> IdempotencyResolver {
        let mut config = IdempotencyConfig::default();
        for (k, v) in overrides {
            config.operation_overrides.insert(k.to_string(), *v);
        }
        IdempotencyResolver::new(config)
    }

    #[test]
    fn exact_override_wins_over_pattern() {
        let resolver = resolver_with_overrides(&[
            ("DELETE /users/:id", IdempotencyLevel::Idempotent),
            ("DELETE /users/42", IdempotencyLevel::Unsafe),
        ]);
        assert_eq!(resolver.resolve("DELETE", "/users/42"), IdempotencyLevel::Unsafe);
        assert_eq!(resolver.resolve("DELETE", "/users/7"), IdempotencyLevel::Idempotent);
    }

    #[test]
    fn get_defaults_to_safe() {
        let resolver = resolver_with_overrides(&[]);
        assert_eq!(resolver.resolve("GET", "/users/1"), IdempotencyLevel::Safe);
    }

    #[test]
    fn post_with_no_override_falls_back_to_configured_default() {
        let resolver = resolver_with_overrides(&[]);
        assert_eq!(resolver.resolve("POST", "/users"), IdempotencyLevel::Safe);
    }

    #[test]
    fn pattern_wildcard_matches_single_segment_only() {
        let resolver = resolver_with_overrides(&[("GET /users/:id/orders", IdempotencyLevel::Idempotent)]);
        assert_eq!(resolver.resolve("GET", "/users/1/orders"), IdempotencyLevel::Idempotent);
        assert_eq!(resolver.resolve("GET", "/users/1/orders/2"), IdempotencyLevel::Safe);
    }

    #[test]
    fn unsafe_never_permits_retry() {
        assert!(!IdempotencyLevel::Unsafe.permits_retry(true));
        assert!(!IdempotencyLevel::Unsafe.permits_retry(false));
    }

    #[test]
    fn conditional_requires_explicit_key() {
        assert!(IdempotencyLevel::Conditional.permits_retry(true));
        assert!(!IdempotencyLevel::Conditional.permits_retry(false));
    }
}
