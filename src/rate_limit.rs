//! Per-provider token bucket rate limiter (§4.3): callers wait in a bounded FIFO
//! queue, a single background pump grants tokens to the front of that queue as they
//! become available, adaptive throttling only ever ratchets the configured rate
//! down (and only when opted in), and `handle_429` pauses refill without touching
//! whatever tokens are already banked.

use crate::adaptive::Adaptive;
use crate::clock::{Clock, MonotonicClock};
use crate::error::RateLimiterError;
use crate::normalize::RateLimitInfo;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::{oneshot, Mutex};

#[derive(Debug, Clone, Copy)]
pub struct RateParams {
    pub tokens_per_second: f64,
    pub max_tokens: f64,
}

impl RateParams {
    pub fn new(tokens_per_second: f64, max_tokens: f64) -> Self {
        Self { tokens_per_second, max_tokens }
    }
}

struct BucketState {
    tokens: f64,
    last_refill_millis: u64,
}

struct Shared {
    params: Adaptive<RateParams>,
    state: Mutex<BucketState>,
    waiters: Mutex<VecDeque<oneshot::Sender<()>>>,
    queue_capacity: usize,
    adaptive_backoff: bool,
    paused_until_millis: AtomicU64,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    pump_started: AtomicBool,
}

fn refill_locked(shared: &Shared, state: &mut BucketState) {
    let params = shared.params.get();
    let now = shared.clock.now_millis();
    let paused_until = shared.paused_until_millis.load(Ordering::Acquire);

    if now < paused_until {
        state.last_refill_millis = now;
        return;
    }

    let elapsed_secs = now.saturating_sub(state.last_refill_millis) as f64 / 1000.0;
    state.tokens = (state.tokens + elapsed_secs * params.tokens_per_second).min(params.max_tokens);
    state.last_refill_millis = now;
}

/// Drains as many FIFO waiters as current tokens allow, then sleeps a tick and
/// repeats. Holds only a `Weak` reference: once every `RateLimiter` clone sharing
/// this `Shared` is dropped, the next tick fails to upgrade and the task exits.
async fn run_pump(shared: Weak<Shared>) {
    loop {
        let Some(shared) = shared.upgrade() else { return };

        {
            let mut state = shared.state.lock().await;
            refill_locked(&shared, &mut state);
            let mut waiters = shared.waiters.lock().await;
            while state.tokens >= 1.0 {
                match waiters.pop_front() {
                    Some(tx) => {
                        state.tokens -= 1.0;
                        let _ = tx.send(());
                    }
                    None => break,
                }
            }
        }

        let sleeper = shared.sleeper.clone();
        drop(shared);
        sleeper.sleep(Duration::from_millis(5)).await;
        tokio::task::yield_now().await;
    }
}

/// A single provider's rate limiter. Cheap to clone; the bucket state and waiter
/// queue are shared via `Arc` so every clone observes the same limiter.
#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

impl RateLimiter {
    pub fn new(params: RateParams, queue_capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                params: Adaptive::new(params),
                state: Mutex::new(BucketState { tokens: params.max_tokens, last_refill_millis: 0 }),
                waiters: Mutex::new(VecDeque::new()),
                queue_capacity,
                adaptive_backoff: false,
                paused_until_millis: AtomicU64::new(0),
                clock: Arc::new(MonotonicClock::default()),
                sleeper: Arc::new(TokioSleeper),
                pump_started: AtomicBool::new(false),
            }),
        }
    }

    /// Must be called before the limiter is cloned or shared; mirrors the same
    /// constraint `with_clock`/`with_sleeper` already have.
    pub fn with_adaptive_backoff(mut self, enabled: bool) -> Self {
        Arc::get_mut(&mut self.shared)
            .expect("with_adaptive_backoff must be called before the limiter is cloned or used")
            .adaptive_backoff = enabled;
        self
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        Arc::get_mut(&mut self.shared)
            .expect("with_clock must be called before the limiter is cloned or used")
            .clock = Arc::new(clock);
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        Arc::get_mut(&mut self.shared)
            .expect("with_sleeper must be called before the limiter is cloned or used")
            .sleeper = Arc::new(sleeper);
        self
    }

    fn ensure_pump_started(&self) {
        if self.shared.pump_started.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            tokio::spawn(run_pump(Arc::downgrade(&self.shared)));
        }
    }

    /// Blocks until a token is available, granted in FIFO order of enqueue, or
    /// fails immediately if the wait queue is already at capacity.
    pub async fn acquire(&self) -> Result<(), RateLimiterError> {
        self.ensure_pump_started();

        {
            let mut state = self.shared.state.lock().await;
            let waiters = self.shared.waiters.lock().await;
            if waiters.is_empty() {
                refill_locked(&self.shared, &mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.shared.waiters.lock().await;
            if waiters.len() >= self.shared.queue_capacity {
                return Err(RateLimiterError::QueueFull);
            }
            waiters.push_back(tx);
        }

        rx.await.map_err(|_| RateLimiterError::Reset)
    }

    /// Adaptive throttling from response headers (§4.3), gated on `adaptive_backoff`.
    /// Utilization above 80% halves `tokensPerSecond` (floor 1); separately, if the
    /// provider's own reset window implies a slower rate, that's adopted instead.
    /// Never raises the rate above the configured baseline.
    pub fn update_from_headers(&self, info: &RateLimitInfo) {
        if !self.shared.adaptive_backoff || info.limit == 0 {
            return;
        }

        let utilization = info.limit.saturating_sub(info.remaining) as f64 / info.limit as f64;
        let seconds_until_reset = info.reset.duration_since(SystemTime::now()).map(|d| d.as_secs_f64()).ok();

        self.shared.params.update(|current| {
            let mut next = *current;
            if utilization > 0.8 {
                next.tokens_per_second = (next.tokens_per_second / 2.0).max(1.0);
            }
            if let Some(seconds_until_reset) = seconds_until_reset {
                if seconds_until_reset > 0.0 && info.remaining < info.limit {
                    let observed_rate = info.limit.saturating_sub(info.remaining) as f64 / seconds_until_reset;
                    if observed_rate < next.tokens_per_second {
                        next.tokens_per_second = observed_rate;
                    }
                }
            }
            next
        });
    }

    /// Pauses all token refill for `retry_after`, per a 429 response. Tokens already
    /// banked are left alone; already-queued waiters can still be granted from that
    /// balance. No request is dropped.
    pub async fn handle_429(&self, retry_after: Duration) {
        let now = self.shared.clock.now_millis();
        self.shared.paused_until_millis.store(now + retry_after.as_millis() as u64, Ordering::Release);
        let mut state = self.shared.state.lock().await;
        state.last_refill_millis = now;
    }

    /// Resets the bucket to full and clears any pause, e.g. on provider reconfiguration.
    pub async fn reset(&self) {
        let params = self.shared.params.get();
        self.shared.paused_until_millis.store(0, Ordering::Release);
        let mut state = self.shared.state.lock().await;
        state.tokens = params.max_tokens;
        state.last_refill_millis = self.shared.clock.now_millis();
    }

    pub fn current_params(&self) -> RateParams {
        *self.shared.params.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::InstantSleeper;
    use std::sync::atomic::{AtomicU64 as StdAtomicU64, Ordering as StdOrdering};

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<StdAtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(StdAtomicU64::new(0)) }
        }
        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, StdOrdering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(StdOrdering::SeqCst)
        }
    }

    #[tokio::test]
    async fn acquires_immediately_while_tokens_available() {
        let limiter = RateLimiter::new(RateParams::new(10.0, 5.0), 10).with_sleeper(InstantSleeper);
        for _ in 0..5 {
            limiter.acquire().await.unwrap();
        }
    }

    #[tokio::test]
    async fn waits_for_refill_once_exhausted() {
        let clock = ManualClock::new();
        let limiter =
            RateLimiter::new(RateParams::new(1.0, 1.0), 10).with_clock(clock.clone()).with_sleeper(InstantSleeper);

        limiter.acquire().await.unwrap();
        clock.advance(1000);
        limiter.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn queue_full_rejects_beyond_capacity() {
        let limiter = RateLimiter::new(RateParams::new(0.001, 1.0), 1).with_sleeper(InstantSleeper);
        limiter.acquire().await.unwrap();

        let limiter_clone = limiter.clone();
        let first = tokio::spawn(async move { limiter_clone.acquire().await });
        tokio::task::yield_now().await;

        let second = limiter.acquire().await;
        assert!(matches!(second, Err(RateLimiterError::QueueFull)));
        first.abort();
    }

    #[tokio::test]
    async fn grants_are_fifo_by_enqueue_order() {
        let clock = ManualClock::new();
        let limiter = RateLimiter::new(RateParams::new(1.0, 1.0), 10)
            .with_clock(clock.clone())
            .with_sleeper(InstantSleeper);

        limiter.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await.unwrap();
                order.lock().await.push(i);
            }));
            tokio::task::yield_now().await;
        }

        for _ in 0..3 {
            clock.advance(1000);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn update_from_headers_is_a_noop_unless_adaptive_backoff_is_enabled() {
        let limiter = RateLimiter::new(RateParams::new(100.0, 100.0), 10);
        let info = RateLimitInfo { limit: 100, remaining: 5, reset: SystemTime::now() + Duration::from_secs(10) };
        limiter.update_from_headers(&info);
        assert_eq!(limiter.current_params().tokens_per_second, 100.0);
    }

    #[tokio::test]
    async fn update_from_headers_halves_rate_past_utilization_threshold() {
        let limiter = RateLimiter::new(RateParams::new(100.0, 100.0), 10).with_adaptive_backoff(true);
        let info = RateLimitInfo { limit: 100, remaining: 5, reset: SystemTime::now() + Duration::from_secs(1000) };
        limiter.update_from_headers(&info);
        assert_eq!(limiter.current_params().tokens_per_second, 50.0);
    }

    #[tokio::test]
    async fn update_from_headers_floors_at_one() {
        let limiter = RateLimiter::new(RateParams::new(1.5, 100.0), 10).with_adaptive_backoff(true);
        let info = RateLimitInfo { limit: 100, remaining: 1, reset: SystemTime::now() + Duration::from_secs(1000) };
        limiter.update_from_headers(&info);
        assert_eq!(limiter.current_params().tokens_per_second, 1.0);
    }

    #[tokio::test]
    async fn update_from_headers_adopts_reset_window_rate_when_lower() {
        let limiter = RateLimiter::new(RateParams::new(100.0, 100.0), 10).with_adaptive_backoff(true);
        let info = RateLimitInfo { limit: 100, remaining: 90, reset: SystemTime::now() + Duration::from_secs(10) };
        limiter.update_from_headers(&info);
        // utilization is 10%, no halving; but (100-90)/10s = 1.0 req/s, far below 100.
        assert_eq!(limiter.current_params().tokens_per_second, 1.0);
    }

    #[tokio::test]
    async fn handle_429_preserves_existing_tokens() {
        let clock = ManualClock::new();
        let limiter = RateLimiter::new(RateParams::new(1000.0, 5.0), 10)
            .with_clock(clock.clone())
            .with_sleeper(InstantSleeper);

        limiter.acquire().await.unwrap();
        let tokens_before = limiter.shared.state.lock().await.tokens;
        limiter.handle_429(Duration::from_millis(500)).await;
        let tokens_after = limiter.shared.state.lock().await.tokens;
        assert_eq!(tokens_after, tokens_before);
    }

    #[tokio::test]
    async fn handle_429_pauses_refill_during_window() {
        let clock = ManualClock::new();
        let limiter = RateLimiter::new(RateParams::new(1000.0, 1.0), 10)
            .with_clock(clock.clone())
            .with_sleeper(InstantSleeper);

        limiter.acquire().await.unwrap();
        limiter.handle_429(Duration::from_millis(500)).await;
        clock.advance(10);

        let tokens = limiter.shared.state.lock().await.tokens;
        assert_eq!(tokens, 0.0);
    }

    #[tokio::test]
    async fn reset_refills_to_max() {
        let limiter = RateLimiter::new(RateParams::new(1.0, 5.0), 10).with_sleeper(InstantSleeper);
        for _ in 0..5 {
            limiter.acquire().await.unwrap();
        }
        limiter.reset().await;
        limiter.acquire().await.unwrap();
    }
}
