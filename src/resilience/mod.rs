//! Composite resilience wrapper (spec §4.8): `timeout ∘ circuit-breaker ∘
//! retry ∘ failover ∘ closure`, outer to inner. The outer timeout bounds the
//! whole invocation including every retry and failover attempt; the circuit
//! breaker is checked once up front and records the *aggregated* verdict of
//! the retry/failover sequence, not each individual attempt.

pub mod circuit_breaker;
pub mod metrics;
pub mod policy;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use metrics::{OperationSnapshot, ResilienceCounters};
pub use policy::{OperationConfig, ResiliencePolicy};
pub use retry::RetryPolicy;

use crate::backend::{OpContext, OperationHint};
use crate::error::{self, ErrorKind, Result, StorageError};
use std::future::Future;
use std::time::Instant;

/// Wraps backend calls with per-operation-type timeout, a per-key circuit
/// breaker, retry with backoff, and (via [`Self::execute_with_failover`])
/// failover across a ranked list of candidate backend keys.
pub struct ResilienceLayer {
    policy: ResiliencePolicy,
    circuits: CircuitBreakerRegistry,
    counters: ResilienceCounters,
}

impl ResilienceLayer {
    pub fn new(policy: ResiliencePolicy, failure_threshold: u32, cooldown: std::time::Duration) -> Self {
        Self {
            policy,
            circuits: CircuitBreakerRegistry::new(failure_threshold, cooldown),
            counters: ResilienceCounters::new(),
        }
    }

    pub fn counters(&self) -> &ResilienceCounters {
        &self.counters
    }

    /// Per-operation-type counters snapshot (spec §4.8).
    pub fn metrics_for(&self, op_type: OperationHint) -> OperationSnapshot {
        self.counters.snapshot(op_type)
    }

    /// Single-target execution: one circuit breaker keyed on `key`, one
    /// overall timeout, retry inside. Cancellation races the timeout and does
    /// not count against the breaker (spec §4.8 Cancellation).
    pub async fn execute<F, Fut, T>(&self, ctx: &OpContext, op_type: OperationHint, key: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = self.policy.for_hint(op_type);
        if !config.enabled {
            return Err(StorageError::operation(ErrorKind::InvalidRequest, "execute", "operation type disabled by policy"));
        }

        let breaker = self.circuits.for_key(key);
        if !breaker.can_attempt().await {
            self.counters.record_circuit_rejection(op_type);
            return Err(StorageError::CircuitOpen {
                op_type: format!("{:?}", op_type),
            });
        }

        let body = config.retry.execute_counted(operation);
        let raced = async {
            tokio::select! {
                _ = ctx.cancel.cancelled() => (Err(StorageError::Cancelled("operation cancelled before completion".to_string())), 0),
                outcome = body => outcome,
            }
        };

        self.counters.record_attempt(op_type);
        let started = Instant::now();
        let (outcome, retries) = match tokio::time::timeout(config.timeout, raced).await {
            Ok(inner) => inner,
            Err(_) => {
                self.counters.record_timeout(op_type);
                (Err(StorageError::operation(ErrorKind::Timeout, "execute", "operation timed out")), 0)
            }
        };
        let elapsed = started.elapsed();
        self.counters.record_retries(op_type, retries);

        match &outcome {
            Ok(_) => {
                breaker.record_success().await;
                self.counters.record_success(op_type, elapsed);
            }
            Err(StorageError::Cancelled(_)) => {}
            Err(_) => {
                if breaker.record_failure().await {
                    self.counters.record_circuit_trip(op_type);
                }
                self.counters.record_failure(op_type, elapsed);
            }
        }

        outcome
    }

    /// Try `candidates` in order, each gated by its own per-backend circuit
    /// breaker and given its own full retry budget, all bounded by one
    /// overall timeout (spec §4.8 Failover: "on non-retryable failure the
    /// next backend is tried until the list is exhausted").
    pub async fn execute_with_failover<F, Fut, T>(
        &self,
        ctx: &OpContext,
        op_type: OperationHint,
        candidates: &[String],
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(&str) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if candidates.is_empty() {
            return Err(StorageError::operation(ErrorKind::NoBackends, "execute_with_failover", "no candidates supplied"));
        }

        let config = self.policy.for_hint(op_type);
        if !config.enabled {
            return Err(StorageError::operation(ErrorKind::InvalidRequest, "execute_with_failover", "operation type disabled by policy"));
        }

        let sweep = async {
            let mut outcomes = Vec::new();
            for key in candidates {
                let breaker = self.circuits.for_key(key);
                if !breaker.can_attempt().await {
                    self.counters.record_circuit_rejection(op_type);
                    outcomes.push((key.clone(), ErrorKind::CircuitOpen));
                    continue;
                }

                self.counters.record_attempt(op_type);
                let started = Instant::now();
                let (result, retries) = config.retry.execute_counted(|| operation(key)).await;
                let elapsed = started.elapsed();
                self.counters.record_retries(op_type, retries);
                match result {
                    Ok(value) => {
                        breaker.record_success().await;
                        self.counters.record_success(op_type, elapsed);
                        return Ok(value);
                    }
                    Err(err) => {
                        if breaker.record_failure().await {
                            self.counters.record_circuit_trip(op_type);
                        }
                        self.counters.record_failure(op_type, elapsed);
                        outcomes.push((key.clone(), err.kind()));
                    }
                }
            }
            Err(error::aggregate(outcomes))
        };

        let raced = async {
            tokio::select! {
                _ = ctx.cancel.cancelled() => Err(StorageError::Cancelled("operation cancelled before completion".to_string())),
                outcome = sweep => outcome,
            }
        };

        match tokio::time::timeout(config.timeout, raced).await {
            Ok(inner) => inner,
            Err(_) => {
                self.counters.record_timeout(op_type);
                Err(StorageError::operation(ErrorKind::Timeout, "execute_with_failover", "operation timed out"))
            }
        }
    }
}
