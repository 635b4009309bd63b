//! Bounded retry with backoff, plus a consecutive-failure circuit breaker.
//!
//! [`Guard`] is the decorator applied to every upstream call (model provider
//! and cache store). It behaves the same regardless of what it wraps:
//!
//! 1. If the breaker is open and the cooldown has not elapsed, fail fast.
//! 2. Otherwise run the call under a timeout.
//! 3. Transient failures are retried with exponential backoff and jitter,
//!    up to `max_retries` extra attempts.
//! 4. Every failed attempt counts towards the breaker; `threshold`
//!    consecutive failures open it. After `cooldown` one probe is let
//!    through (half-open): success closes the breaker, failure re-opens it.
//!    A probe whose future is dropped mid-flight counts as a failed probe.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{CacheError, LlmError};

/// Errors that can flow through a [`Guard`].
pub trait UpstreamError: std::error::Error + Send + Sync + 'static {
    /// Whether another attempt may succeed.
    fn is_transient(&self) -> bool;
    /// Error returned when the breaker rejects a call.
    fn circuit_open(name: &str) -> Self;
    /// Error returned when an attempt exceeds the timeout.
    fn timed_out(name: &str, timeout: Duration) -> Self;
}

impl UpstreamError for LlmError {
    fn is_transient(&self) -> bool {
        LlmError::is_transient(self)
    }
    fn circuit_open(name: &str) -> Self {
        LlmError::CircuitOpen {
            name: name.to_string(),
        }
    }
    fn timed_out(name: &str, timeout: Duration) -> Self {
        LlmError::Timeout {
            name: name.to_string(),
            timeout,
        }
    }
}

impl UpstreamError for CacheError {
    fn is_transient(&self) -> bool {
        CacheError::is_transient(self)
    }
    fn circuit_open(name: &str) -> Self {
        CacheError::CircuitOpen {
            name: name.to_string(),
        }
    }
    fn timed_out(name: &str, timeout: Duration) -> Self {
        CacheError::Timeout {
            name: name.to_string(),
            timeout,
        }
    }
}

/// Retry policy for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: u32,
    /// Randomize each delay into `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let scale = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(scale)
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub threshold: u32,
    /// How long the breaker stays open before a probe is allowed.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Breaker state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, promoting open to half-open once the cooldown elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Ask permission to make a call. `None` means the call must fail fast.
    ///
    /// The returned permit must be settled with [`BreakerPermit::succeeded`]
    /// or [`BreakerPermit::failed`]. A half-open probe permit dropped without
    /// being settled re-opens the breaker for another cooldown.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        let probe = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => return None,
            BreakerState::HalfOpen if inner.probe_in_flight => return None,
            BreakerState::HalfOpen => {
                inner.probe_in_flight = true;
                true
            }
        };
        Some(BreakerPermit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            warn!(breaker = %self.name, "Circuit breaker closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.probe_in_flight = false;
        let trip = inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.config.threshold;
        if trip {
            if inner.state != BreakerState::Open {
                warn!(
                    breaker = %self.name,
                    failures = inner.consecutive_failures,
                    cooldown = ?self.config.cooldown,
                    "Circuit breaker opened"
                );
            }
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// A probe was cancelled before it finished.
    fn abandon_probe(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::HalfOpen || !inner.probe_in_flight {
            return;
        }
        warn!(breaker = %self.name, "Circuit breaker probe cancelled, re-opening");
        inner.probe_in_flight = false;
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
    }

    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let cooled = inner
            .opened_at
            .map(|at| at.elapsed() >= self.config.cooldown)
            .unwrap_or(true);
        if cooled {
            debug!(breaker = %self.name, "Circuit breaker half-open, allowing probe");
            inner.state = BreakerState::HalfOpen;
            inner.probe_in_flight = false;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // A poisoned lock only means another thread panicked mid-update;
        // the counters are still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Permission for one call through a [`CircuitBreaker`].
#[derive(Debug)]
#[must_use = "settle the permit with `succeeded` or `failed`"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.abandon_probe();
        }
    }
}

/// Retry + breaker + timeout, applied around one upstream dependency.
#[derive(Debug)]
pub struct Guard {
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl Guard {
    pub fn new(
        name: impl Into<String>,
        retry: RetryPolicy,
        breaker: BreakerConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            retry,
            breaker: CircuitBreaker::new(name, breaker),
            timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `call` under the guard's policy. `call` is invoked once per attempt.
    pub async fn run<T, E, F, Fut>(&self, mut call: F) -> Result<T, E>
    where
        E: UpstreamError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let name = self.breaker.name().to_string();
        let mut attempt = 0u32;
        loop {
            let Some(permit) = self.breaker.try_acquire() else {
                return Err(E::circuit_open(&name));
            };

            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(E::timed_out(&name, self.timeout)),
            };

            let err = match outcome {
                Ok(value) => {
                    permit.succeeded();
                    return Ok(value);
                }
                Err(e) => e,
            };

            permit.failed();
            if !err.is_transient() || attempt >= self.retry.max_retries {
                if attempt > 0 {
                    warn!(guard = %name, attempts = attempt + 1, error = %err, "All attempts failed");
                }
                return Err(err);
            }

            let delay = self.retry.jittered(attempt);
            warn!(
                guard = %name,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Upstream call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> CacheError {
        CacheError::Unavailable("connection reset".into())
    }

    fn guard(max_retries: u32, threshold: u32) -> Guard {
        Guard::new(
            "test",
            RetryPolicy {
                max_retries,
                jitter: false,
                ..RetryPolicy::default()
            },
            BreakerConfig {
                threshold,
                cooldown: Duration::from_secs(30),
            },
            Duration::from_secs(1),
        )
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2,
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_half_to_full() {
        let policy = RetryPolicy::default();
        for attempt in 0..5 {
            let full = policy.delay_for(attempt);
            let jittered = policy.jittered(attempt);
            assert!(jittered <= full);
            assert!(jittered >= full / 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let guard = guard(3, 10);
        let calls = &AtomicU32::new(0);

        let result: Result<u32, CacheError> = guard
            .run(|| async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(transient()) } else { Ok(n) }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(guard.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let guard = guard(3, 10);
        let calls = &AtomicU32::new(0);

        let result: Result<(), CacheError> = guard
            .run(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CacheError::Command("WRONGTYPE".into()))
            })
            .await;

        assert!(matches!(result, Err(CacheError::Command(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let guard = guard(2, 10);
        let calls = &AtomicU32::new(0);

        let result: Result<(), CacheError> = guard
            .run(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(matches!(result, Err(CacheError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let guard = guard(0, 10);

        let result: Result<(), CacheError> = guard
            .run(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CacheError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_fails_fast_then_half_opens() {
        let guard = guard(0, 2);
        let calls = &AtomicU32::new(0);

        for _ in 0..2 {
            let _: Result<(), CacheError> = guard
                .run(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                })
                .await;
        }
        assert_eq!(guard.breaker().state(), BreakerState::Open);

        // Rejected without invoking the call.
        let result: Result<(), CacheError> = guard
            .run(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CacheError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(guard.breaker().state(), BreakerState::HalfOpen);

        // Probe succeeds and closes the breaker.
        let result: Result<(), CacheError> = guard.run(|| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(guard.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let guard = guard(0, 1);

        let _: Result<(), CacheError> = guard.run(|| async { Err(transient()) }).await;
        assert_eq!(guard.breaker().state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        let _: Result<(), CacheError> = guard.run(|| async { Err(transient()) }).await;
        assert_eq!(guard.breaker().state(), BreakerState::Open);
    }

    #[test]
    fn half_open_allows_single_probe() {
        let breaker = CircuitBreaker::new(
            "probe",
            BreakerConfig {
                threshold: 1,
                cooldown: Duration::ZERO,
            },
        );
        breaker.try_acquire().unwrap().failed();
        let probe = breaker.try_acquire().unwrap();
        assert!(breaker.try_acquire().is_none());
        probe.succeeded();
        let first = breaker.try_acquire().unwrap();
        let second = breaker.try_acquire().unwrap();
        first.succeeded();
        second.succeeded();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_half_open_call_reopens_breaker() {
        let guard = guard(0, 1);

        let _: Result<(), CacheError> = guard.run(|| async { Err(transient()) }).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(guard.breaker().state(), BreakerState::HalfOpen);

        // Caller gives up before the guard's own timeout.
        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            guard.run(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), CacheError>(())
            }),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(guard.breaker().state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        let result: Result<(), CacheError> = guard.run(|| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(guard.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_closed_call_does_not_count_as_failure() {
        let guard = guard(0, 1);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            guard.run(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), CacheError>(())
            }),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(guard.breaker().state(), BreakerState::Closed);
    }
}
