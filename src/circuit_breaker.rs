//! Three-state circuit breaker per provider (§4.2): lock-free state transitions on the
//! call-admission fast path, a mutex-guarded rolling window only touched on the
//! (already serialized) success/failure recording path.

use crate::clock::{Clock, MonotonicClock};
use crate::error::CanonicalError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub success_threshold: usize,
    pub timeout: Duration,
    pub volume_threshold: usize,
    pub rolling_window: Duration,
    pub error_threshold_percentage: f64,
    pub half_open_max_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            timeout: Duration::from_secs(60),
            volume_threshold: 20,
            rolling_window: Duration::from_secs(60),
            error_threshold_percentage: 50.0,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Never opens: `failure_threshold`/`volume_threshold` at `usize::MAX`.
    pub fn disabled() -> Self {
        Self {
            failure_threshold: usize::MAX,
            volume_threshold: usize::MAX,
            ..Self::default()
        }
    }
}

struct Sample {
    at_millis: u64,
    success: bool,
}

/// A per-provider breaker snapshot, exposed for operational tooling (§6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    pub failures: usize,
    pub successes: usize,
    pub last_failure: Option<SystemTime>,
    pub next_attempt: Option<SystemTime>,
}

pub(crate) struct CircuitBreakerState {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    total_successes: AtomicUsize,
    opened_at_millis: AtomicU64,
    last_failure_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
    half_open_successes: AtomicUsize,
    window: Mutex<VecDeque<Sample>>,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicUsize::new(0),
            total_successes: AtomicUsize::new(0),
            opened_at_millis: AtomicU64::new(0),
            last_failure_at_millis: AtomicU64::new(0),
            half_open_calls: AtomicUsize::new(0),
            half_open_successes: AtomicUsize::new(0),
            window: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn reset(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at_millis.store(0, Ordering::Release);
        self.half_open_calls.store(0, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
        self.window.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub(crate) fn current_state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Per-provider circuit breaker, produced once at provider start and shared by
/// `Arc` across concurrent calls to that provider.
#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<CircuitBreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    provider: String,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState::new()),
            config,
            clock: Arc::new(MonotonicClock::default()),
            provider: provider.into(),
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn state(&self) -> CircuitState {
        self.state.current_state()
    }

    pub fn failure_count(&self) -> usize {
        self.state.consecutive_failures.load(Ordering::Acquire)
    }

    /// Total calls that have succeeded over this breaker's lifetime, regardless of
    /// state transitions. Unlike `failure_count`, never reset back to zero by a
    /// transition to `Closed`.
    pub fn success_count(&self) -> usize {
        self.state.total_successes.load(Ordering::Acquire)
    }

    /// Wall-clock time of the most recent recorded failure, if any.
    pub fn last_failure(&self) -> Option<SystemTime> {
        let millis = self.state.last_failure_at_millis.load(Ordering::Acquire);
        if millis == 0 {
            None
        } else {
            Some(UNIX_EPOCH + Duration::from_millis(millis))
        }
    }

    /// When the breaker will next allow a probe through, if it's currently `Open`.
    pub fn next_attempt(&self) -> Option<SystemTime> {
        if self.state() != CircuitState::Open {
            return None;
        }
        let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
        Some(self.next_attempt_from(opened_at))
    }

    /// A full snapshot of this provider's breaker for operational inspection.
    pub fn status(&self) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            state: self.state(),
            failures: self.failure_count(),
            successes: self.success_count(),
            last_failure: self.last_failure(),
            next_attempt: self.next_attempt(),
        }
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    fn next_attempt_from(&self, opened_at_millis: u64) -> SystemTime {
        let elapsed = self.now_millis().saturating_sub(opened_at_millis);
        let remaining = self.config.timeout.as_millis() as u64 - elapsed.min(self.config.timeout.as_millis() as u64);
        SystemTime::now() + Duration::from_millis(remaining)
    }

    fn short_circuit_error(&self, request_id: &str, opened_at_millis: u64) -> CanonicalError {
        CanonicalError::circuit_open(self.provider.clone(), request_id, self.next_attempt_from(opened_at_millis))
    }

    /// Runs `operation` through the breaker, short-circuiting per §4.2's transition
    /// rules. `request_id` is threaded through only so the short-circuit error carries
    /// it, mirroring the pipeline-assigned id on every other canonical error.
    pub async fn execute<T, Fut, Op>(&self, request_id: &str, mut operation: Op) -> Result<T, CanonicalError>
    where
        T: Send,
        Fut: Future<Output = Result<T, CanonicalError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        loop {
            let current = self.state.state.load(Ordering::Acquire);
            match current {
                STATE_OPEN => {
                    let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                    let elapsed = self.now_millis().saturating_sub(opened_at);
                    if elapsed >= self.config.timeout.as_millis() as u64 {
                        match self.state.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                tracing::info!(provider = %self.provider, "circuit breaker -> half-open");
                                self.state.half_open_calls.store(1, Ordering::Release);
                                self.state.half_open_successes.store(0, Ordering::Release);
                                break;
                            }
                            Err(STATE_HALF_OPEN) => continue,
                            Err(STATE_CLOSED) => break,
                            Err(_) => unreachable!("invalid circuit breaker state transition"),
                        }
                    } else {
                        return Err(self.short_circuit_error(request_id, opened_at));
                    }
                }
                STATE_HALF_OPEN => {
                    let in_flight = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if in_flight >= self.config.half_open_max_calls {
                        self.state.half_open_calls.fetch_sub(1, Ordering::Release);
                        let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                        return Err(self.short_circuit_error(request_id, opened_at));
                    }
                    break;
                }
                STATE_CLOSED => break,
                _ => unreachable!("invalid circuit breaker state"),
            }
        }

        let was_half_open = self.state.state.load(Ordering::Acquire) == STATE_HALF_OPEN;
        let result = operation().await;
        if was_half_open {
            self.state.half_open_calls.fetch_sub(1, Ordering::Release);
        }

        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        result
    }

    fn record_sample(&self, success: bool) -> (usize, usize) {
        let now = self.now_millis();
        let window_ms = self.config.rolling_window.as_millis() as u64;
        let mut window = self.state.window.lock().unwrap_or_else(|p| p.into_inner());
        window.push_back(Sample { at_millis: now, success });
        while let Some(front) = window.front() {
            if now.saturating_sub(front.at_millis) > window_ms {
                window.pop_front();
            } else {
                break;
            }
        }
        let total = window.len();
        let errors = window.iter().filter(|s| !s.success).count();
        (total, errors)
    }

    fn on_success(&self) {
        self.record_sample(true);
        self.state.total_successes.fetch_add(1, Ordering::AcqRel);
        match self.state.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                let successes = self.state.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold
                    && self
                        .state
                        .state
                        .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.state.consecutive_failures.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(0, Ordering::Release);
                    self.state.window.lock().unwrap_or_else(|p| p.into_inner()).clear();
                    tracing::info!(provider = %self.provider, "circuit breaker -> closed");
                }
            }
            STATE_CLOSED => {
                self.state.consecutive_failures.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    fn on_failure(&self) {
        let (samples_in_window, errors_in_window) = self.record_sample(false);
        let now_wall_millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
        self.state.last_failure_at_millis.store(now_wall_millis, Ordering::Release);
        match self.state.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::warn!(provider = %self.provider, "circuit breaker: half-open probe failed -> open");
                }
            }
            STATE_CLOSED => {
                let consecutive = self.state.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                let error_rate = if samples_in_window == 0 {
                    0.0
                } else {
                    errors_in_window as f64 / samples_in_window as f64 * 100.0
                };
                let should_open = consecutive >= self.config.failure_threshold
                    || (samples_in_window >= self.config.volume_threshold
                        && error_rate >= self.config.error_threshold_percentage);

                if should_open
                    && self
                        .state
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::error!(
                        provider = %self.provider,
                        consecutive,
                        error_rate,
                        "circuit breaker -> open"
                    );
                }
            }
            _ => {}
        }
    }
}
