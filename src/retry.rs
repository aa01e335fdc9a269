//! Safety-inverted retry: a failure is retried only when it is both `retryable` and
//! idempotency-safe for the given operation (§4.5).

use crate::backoff::Backoff;
use crate::error::{push_retry_history, CanonicalError, MAX_RETRY_HISTORY};
use crate::idempotency::IdempotencyLevel;
use crate::jitter::Jitter;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Runs `operation`, retrying while the returned error is `retryable` and the
    /// idempotency level at `has_key` permits a retry. `Unsafe` operations and
    /// `Conditional` ones without a key never retry, regardless of `retryable`.
    pub async fn execute<T, Fut, Op>(
        &self,
        level: IdempotencyLevel,
        has_key: bool,
        mut operation: Op,
    ) -> Result<T, CanonicalError>
    where
        T: Send,
        Fut: Future<Output = Result<T, CanonicalError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let mut history: Vec<CanonicalError> = Vec::new();
        let total_attempts = self.max_retries + 1;

        for attempt in 0..total_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let can_retry = err.retryable && level.permits_retry(has_key);
                    let is_last_attempt = attempt + 1 >= total_attempts;

                    if !can_retry || is_last_attempt {
                        return Err(err);
                    }

                    push_retry_history(&mut history, err);

                    let delay = self.jitter.apply(self.backoff.delay(attempt + 1));
                    self.sleeper.sleep(delay).await;
                }
            }
        }

        unreachable!("retry loop always returns before exhausting its attempt range")
    }
}

pub struct RetryPolicyBuilder {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(30)),
            jitter: Jitter::default_uniform(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            jitter: self.jitter,
            sleeper: self.sleeper,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
