//! Jitter added on top of a backoff delay to avoid synchronized retry storms.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Additive jitter strategy. Unlike a "full jitter" scheme that replaces the computed
/// delay outright, this adds a bounded random amount on top of it, matching the
/// `baseDelay * 2^attempt + jitter` backoff formula.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Jitter {
    /// No jitter; the backoff delay is used as-is.
    None,
    /// Uniform random addend in `[0, max]`.
    Uniform {
        #[serde(with = "millis")]
        max: Duration,
    },
}

impl Default for Jitter {
    fn default() -> Self {
        Jitter::default_uniform()
    }
}

mod millis {
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

impl Jitter {
    /// The default jitter range named by the backoff formula: uniform in `[0, 1000ms]`.
    pub fn default_uniform() -> Self {
        Jitter::Uniform { max: Duration::from_millis(1000) }
    }

    /// Add jitter to a base delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Add jitter using a caller-supplied RNG, for deterministic tests.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Uniform { max } => {
                let max_millis = max.as_millis() as u64;
                let addend = if max_millis == 0 { 0 } else { rng.gen_range(0..=max_millis) };
                delay.saturating_add(Duration::from_millis(addend))
            }
        }
    }
}
