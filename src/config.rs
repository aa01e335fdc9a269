//! Declarative, serde-deserializable configuration (§6): one `BoundaryConfig` holding
//! a table of per-provider settings, validated once at [`crate::registry::BoundaryClient::start`]
//! time rather than scattered across each component's constructor.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::ConfigError;
use crate::idempotency::IdempotencyConfig;
use crate::jitter::Jitter;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether provider state (rate limit buckets, circuit breaker counters) lives only
/// in this process or is shared across instances via a [`crate::state_storage::StateStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Local,
    Distributed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Frozen at 0 (§4.5 policy inversion): retries are opt-in, never a surprise
    /// default a caller has to turn off.
    pub max_retries: usize,
    #[serde(with = "humantime_millis")]
    pub base_delay: Duration,
    #[serde(with = "humantime_millis")]
    pub max_delay: Duration,
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 0, base_delay: Duration::from_millis(500), max_delay: Duration::from_secs(30), jitter: Jitter::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub tokens_per_second: f64,
    pub max_tokens: f64,
    pub queue_capacity: usize,
    /// Gates whether `RateLimiter::update_from_headers` adapts the configured rate
    /// down from provider-reported headroom (§4.3). Off by default: a provider's
    /// rate-limit headers are advisory until an embedder opts in.
    pub adaptive_backoff: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { tokens_per_second: 10.0, max_tokens: 20.0, queue_capacity: 64, adaptive_backoff: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    #[serde(with = "humantime_millis")]
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub idempotency: IdempotencyConfig,
    pub mode: Mode,
    /// Required to opt a [`Mode::Local`] provider out of state storage entirely.
    /// Distributed mode never accepts this escape hatch.
    pub local_unsafe: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: crate::pipeline::DEFAULT_TIMEOUT,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            idempotency: IdempotencyConfig::default(),
            mode: Mode::default(),
            local_unsafe: false,
        }
    }
}

/// Extra terms appended to [`crate::sanitize::DEFAULT_REDACTED_KEYS`] when
/// sanitizing observability payloads (§6, `observabilitySanitizer.redactedKeys`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ObservabilitySanitizerConfig {
    pub redacted_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BoundaryConfig {
    pub providers: IndexMap<String, ProviderConfig>,
    pub observability_sanitizer: ObservabilitySanitizerConfig,
}

impl BoundaryConfig {
    /// Validates every provider entry, returning the first violation found. Provider
    /// iteration order follows insertion order so errors are reproducible.
    pub fn validate(&self, has_state_storage: bool) -> Result<(), ConfigError> {
        for (name, provider) in &self.providers {
            if provider.circuit_breaker.failure_threshold == 0 {
                return Err(ConfigError::InvalidFailureThreshold(name.clone()));
            }
            if provider.rate_limit.tokens_per_second <= 0.0 {
                return Err(ConfigError::InvalidTokensPerSecond(name.clone()));
            }
            if provider.rate_limit.max_tokens < 1.0 {
                return Err(ConfigError::InvalidMaxTokens(name.clone()));
            }
            match provider.mode {
                Mode::Distributed if !has_state_storage => {
                    return Err(ConfigError::DistributedModeRequiresStateStorage);
                }
                Mode::Local if !has_state_storage && !provider.local_unsafe => {
                    return Err(ConfigError::LocalModeRequiresStateStorageOrUnsafe);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

mod humantime_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_providers() {
        let config = BoundaryConfig::default();
        assert!(config.providers.is_empty());
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn local_mode_without_storage_requires_opt_in() {
        let mut config = BoundaryConfig::default();
        config.providers.insert("stripe".to_string(), ProviderConfig::default());
        assert!(matches!(config.validate(false), Err(ConfigError::LocalModeRequiresStateStorageOrUnsafe)));

        config.providers.get_mut("stripe").unwrap().local_unsafe = true;
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn distributed_mode_always_requires_storage() {
        let mut config = BoundaryConfig::default();
        let mut provider = ProviderConfig::default();
        provider.mode = Mode::Distributed;
        provider.local_unsafe = true;
        config.providers.insert("stripe".to_string(), provider);
        assert!(matches!(config.validate(false), Err(ConfigError::DistributedModeRequiresStateStorage)));
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn rejects_non_positive_rate_limit_params() {
        let mut config = BoundaryConfig::default();
        let mut provider = ProviderConfig::default();
        provider.local_unsafe = true;
        provider.rate_limit.tokens_per_second = 0.0;
        config.providers.insert("stripe".to_string(), provider);
        assert!(matches!(config.validate(false), Err(ConfigError::InvalidTokensPerSecond(_))));
    }
}
