//! Per-provider circuit breaker.
//!
//! Closed until `failure_threshold` consecutive calls fail within
//! `failure_window`; then open for `cooldown`, after which exactly one trial
//! call is let through (half-open). The trial's outcome closes or reopens it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use rag_core::ResilienceConfig;

/// Breaker state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub cooldown: Duration,
}

impl From<&ResilienceConfig> for BreakerConfig {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            failure_window: Duration::from_secs(config.failure_window_secs),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker guarding one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                window_start: None,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// State at `now`. An open breaker whose cooldown elapsed reads as half-open.
    pub fn state_at(&self, now: Instant) -> BreakerState {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (BreakerState::Open, Some(at)) if now.duration_since(at) >= self.config.cooldown => {
                BreakerState::HalfOpen
            }
            (state, _) => state,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state_at(Instant::now())
    }

    /// Ask to make a call. `None` means the call must not be made.
    pub fn try_acquire(self: &Arc<Self>, now: Instant) -> Option<Permit> {
        let mut inner = self.inner.lock();
        let trial = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| now.duration_since(at) >= self.config.cooldown)
                    .unwrap_or(true);
                if !cooled {
                    return None;
                }
                info!("Circuit for {} half-open, allowing a trial call", self.name);
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = true;
                true
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    return None;
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Some(Permit {
            breaker: Arc::clone(self),
            trial,
            settled: false,
        })
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            info!("Circuit for {} closed", self.name);
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.window_start = None;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn record_failure(&self, trial: bool, now: Instant) {
        let mut inner = self.inner.lock();

        if trial || inner.state == BreakerState::HalfOpen {
            warn!("Trial call for {} failed, circuit reopened", self.name);
            inner.state = BreakerState::Open;
            inner.opened_at = Some(now);
            inner.failure_count = 0;
            inner.window_start = None;
            inner.trial_in_flight = false;
            return;
        }
        if inner.state == BreakerState::Open {
            return;
        }

        let in_window = inner
            .window_start
            .map(|start| now.duration_since(start) <= self.config.failure_window)
            .unwrap_or(false);
        if in_window {
            inner.failure_count += 1;
        } else {
            inner.window_start = Some(now);
            inner.failure_count = 1;
        }

        if inner.failure_count >= self.config.failure_threshold {
            warn!(
                "Circuit for {} opened after {} consecutive failures",
                self.name, inner.failure_count
            );
            inner.state = BreakerState::Open;
            inner.opened_at = Some(now);
        }
    }

    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }
}

/// Permission to make one call. Dropping it without reporting an outcome
/// records nothing and frees a half-open trial slot.
#[derive(Debug)]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl Permit {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self, now: Instant) {
        self.settled = true;
        self.breaker.record_failure(self.trial, now);
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

/// Breakers keyed by provider name.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for `provider`, created closed on first use.
    pub fn get(&self, provider: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, self.config)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 5,
                failure_window: Duration::from_secs(120),
                cooldown: Duration::from_secs(30),
            },
        ))
    }

    fn fail(b: &Arc<CircuitBreaker>, now: Instant) {
        b.try_acquire(now).unwrap().failure(now);
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let b = breaker();
        let t0 = Instant::now();
        for i in 0..4 {
            fail(&b, t0 + Duration::from_secs(i));
        }
        assert_eq!(b.state_at(t0 + Duration::from_secs(4)), BreakerState::Closed);

        fail(&b, t0 + Duration::from_secs(5));
        assert_eq!(b.state_at(t0 + Duration::from_secs(6)), BreakerState::Open);
        assert!(b.try_acquire(t0 + Duration::from_secs(6)).is_none());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..4 {
            fail(&b, t0);
        }
        b.try_acquire(t0).unwrap().success();
        for _ in 0..4 {
            fail(&b, t0);
        }
        assert_eq!(b.state_at(t0), BreakerState::Closed);
    }

    #[test]
    fn test_failures_outside_window_do_not_accumulate() {
        let b = breaker();
        let t0 = Instant::now();
        for i in 0..4 {
            fail(&b, t0 + Duration::from_secs(i));
        }
        // window elapsed: the count starts over
        fail(&b, t0 + Duration::from_secs(200));
        assert_eq!(b.state_at(t0 + Duration::from_secs(200)), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_single_trial_then_close() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..5 {
            fail(&b, t0);
        }

        let later = t0 + Duration::from_secs(31);
        assert_eq!(b.state_at(later), BreakerState::HalfOpen);

        let trial = b.try_acquire(later).unwrap();
        assert!(trial.is_trial());
        assert!(b.try_acquire(later).is_none());

        trial.success();
        assert_eq!(b.state_at(later), BreakerState::Closed);
        assert!(b.try_acquire(later).is_some());
    }

    #[test]
    fn test_failed_trial_reopens() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..5 {
            fail(&b, t0);
        }

        let later = t0 + Duration::from_secs(31);
        b.try_acquire(later).unwrap().failure(later);
        assert_eq!(b.state_at(later), BreakerState::Open);
        assert!(b.try_acquire(later + Duration::from_secs(1)).is_none());
        assert!(b.try_acquire(later + Duration::from_secs(30)).is_some());
    }

    #[test]
    fn test_dropped_trial_frees_slot_without_outcome() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..5 {
            fail(&b, t0);
        }

        let later = t0 + Duration::from_secs(31);
        drop(b.try_acquire(later).unwrap());
        assert_eq!(b.state_at(later), BreakerState::HalfOpen);

        let again = b.try_acquire(later);
        assert!(again.is_some());
    }

    #[test]
    fn test_registry_shares_breaker_per_provider() {
        let registry = BreakerRegistry::new(BreakerConfig::from(&ResilienceConfig::default()));
        let a = registry.get("anthropic");
        let b = registry.get("anthropic");
        let c = registry.get("workers-ai");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
