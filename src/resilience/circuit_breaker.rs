//! Three-state circuit breaker (spec §4.8), adapted from a load-balancer's
//! `circuit_breaker` module to the generic resilience wrapper used here.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    failure_threshold: u32,
    success_threshold: u32,
    cooldown: Duration,
    opened_at: RwLock<Option<Instant>>,
    trips: AtomicU32,
    rejections: AtomicU32,
    half_open_max_requests: u32,
    half_open_requests: AtomicU32,
    half_open_successes: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            failure_threshold,
            success_threshold: 1,
            cooldown,
            opened_at: RwLock::new(None),
            trips: AtomicU32::new(0),
            rejections: AtomicU32::new(0),
            half_open_max_requests: 1,
            half_open_requests: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
        }
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Caps how many callers may probe the backend while half-open (spec
    /// §8: "after the cooldown, a single probe is permitted" — default 1).
    pub fn with_half_open_max_requests(mut self, max_requests: u32) -> Self {
        self.half_open_max_requests = max_requests;
        self
    }

    /// Checks whether a call may proceed, transitioning open -> half-open
    /// after cooldown. Short-circuits (returns `false`) without running the
    /// wrapped closure while open, and while half-open once
    /// `half_open_max_requests` probes are already in flight.
    pub async fn can_attempt(&self) -> bool {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                let in_flight = self.half_open_requests.fetch_add(1, Ordering::SeqCst);
                if in_flight < self.half_open_max_requests {
                    true
                } else {
                    self.half_open_requests.fetch_sub(1, Ordering::SeqCst);
                    self.rejections.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
            CircuitState::Open => {
                let opened_at = *self.opened_at.read().await;
                if opened_at.map(|t| t.elapsed() >= self.cooldown).unwrap_or(false) {
                    *state = CircuitState::HalfOpen;
                    self.success_count.store(0, Ordering::SeqCst);
                    self.half_open_requests.store(1, Ordering::SeqCst);
                    true
                } else {
                    self.rejections.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                if self.half_open_requests.load(Ordering::SeqCst) > 0 {
                    self.half_open_requests.fetch_sub(1, Ordering::SeqCst);
                }
                self.half_open_successes.fetch_add(1, Ordering::Relaxed);
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.success_threshold {
                    *state = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::SeqCst);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed attempt, returning `true` if this call is what just
    /// tripped the breaker open (closed->open or half-open->open), so
    /// callers can attribute a circuit-trip metric to the triggering op.
    pub async fn record_failure(&self) -> bool {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.failure_threshold {
                    *state = CircuitState::Open;
                    *self.opened_at.write().await = Some(Instant::now());
                    self.trips.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                false
            }
            CircuitState::HalfOpen => {
                self.half_open_requests.store(0, Ordering::SeqCst);
                *state = CircuitState::Open;
                *self.opened_at.write().await = Some(Instant::now());
                self.trips.fetch_add(1, Ordering::Relaxed);
                true
            }
            CircuitState::Open => false,
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    pub fn trips(&self) -> u32 {
        self.trips.load(Ordering::Relaxed)
    }

    pub fn rejections(&self) -> u32 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Cumulative count of successes recorded while half-open, never reset
    /// across state transitions (spec §4.8 per-circuit-breaker counters),
    /// distinct from `success_count` which tracks only the current
    /// half-open window's progress toward `success_threshold`.
    pub fn half_open_successes(&self) -> u32 {
        self.half_open_successes.load(Ordering::Relaxed)
    }
}

/// Per-operation-type circuit breakers, optionally keyed per backend (spec
/// §4.8: "per resilience instance, optionally per-backend").
pub struct CircuitBreakerRegistry {
    breakers: dashmap::DashMap<String, Arc<CircuitBreaker>>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            breakers: dashmap::DashMap::new(),
            failure_threshold,
            cooldown,
        }
    }

    pub fn for_key(&self, key: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.failure_threshold, self.cooldown)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(5));
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.can_attempt().await);
    }

    #[tokio::test]
    async fn half_open_probe_after_cooldown() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(50));
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cb.can_attempt().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(20));
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        cb.can_attempt().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_limits_concurrent_probes() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(20)).with_half_open_max_requests(2);
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cb.can_attempt().await);
        assert!(cb.can_attempt().await);
        assert!(!cb.can_attempt().await);
    }

    #[tokio::test]
    async fn half_open_default_allows_a_single_probe() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(20));
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cb.can_attempt().await);
        assert!(!cb.can_attempt().await);
    }

    #[tokio::test]
    async fn half_open_successes_accumulate_across_transitions() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(20)).with_half_open_max_requests(3);
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        cb.can_attempt().await;
        cb.record_success().await;
        assert_eq!(cb.half_open_successes(), 1);

        cb.record_failure().await; // reopen
        tokio::time::sleep(Duration::from_millis(40)).await;
        cb.can_attempt().await;
        cb.record_success().await;
        assert_eq!(cb.half_open_successes(), 2);
    }

    #[tokio::test]
    async fn half_open_closes_after_n_successes() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(20)).with_success_threshold(2);
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        cb.can_attempt().await;

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }
}
