//! Resilience counters (spec §4.8: "per operation-type counters {total,
//! successful, failed, total-duration, avg-duration, last-op-time}"), keyed
//! per [`OperationHint`] in a `dashmap`-backed registry — the same per-key
//! lazy-entry pattern [`crate::resilience::circuit_breaker::CircuitBreakerRegistry`]
//! and [`crate::backend::BackendSelector`] use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::backend::OperationHint;

#[derive(Debug, Default)]
struct OperationCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    circuit_rejections: AtomicU64,
    circuit_trips: AtomicU64,
    timeouts: AtomicU64,
    total_duration_nanos: AtomicU64,
    last_op_time_nanos: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub retries: u64,
    pub circuit_rejections: u64,
    pub circuit_trips: u64,
    pub timeouts: u64,
    pub total_duration: Duration,
    pub avg_duration: Duration,
    /// Nanoseconds since process start the last attempt for this operation
    /// type completed, or `None` if none has yet.
    pub last_op_time: Option<Duration>,
}

pub struct ResilienceCounters {
    by_op: dashmap::DashMap<OperationHint, OperationCounters>,
    clock_start: std::time::Instant,
}

impl Default for ResilienceCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResilienceCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceCounters").finish_non_exhaustive()
    }
}

impl ResilienceCounters {
    pub fn new() -> Self {
        Self {
            by_op: dashmap::DashMap::new(),
            clock_start: std::time::Instant::now(),
        }
    }

    fn entry(&self, op_type: OperationHint) -> dashmap::mapref::one::RefMut<'_, OperationHint, OperationCounters> {
        self.by_op.entry(op_type).or_default()
    }

    fn stamp_last_op_time(&self, counters: &OperationCounters) {
        counters.last_op_time_nanos.store(self.clock_start.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_attempt(&self, op_type: OperationHint) {
        self.entry(op_type).total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, op_type: OperationHint, duration: Duration) {
        let counters = self.entry(op_type);
        counters.successful.fetch_add(1, Ordering::Relaxed);
        counters.total_duration_nanos.fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.stamp_last_op_time(&counters);
    }

    pub fn record_failure(&self, op_type: OperationHint, duration: Duration) {
        let counters = self.entry(op_type);
        counters.failed.fetch_add(1, Ordering::Relaxed);
        counters.total_duration_nanos.fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.stamp_last_op_time(&counters);
    }

    pub fn record_retries(&self, op_type: OperationHint, count: u32) {
        if count > 0 {
            self.entry(op_type).retries.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn record_circuit_rejection(&self, op_type: OperationHint) {
        self.entry(op_type).circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_trip(&self, op_type: OperationHint) {
        self.entry(op_type).circuit_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self, op_type: OperationHint) {
        self.entry(op_type).timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, op_type: OperationHint) -> OperationSnapshot {
        match self.by_op.get(&op_type) {
            Some(counters) => to_snapshot(&counters),
            None => OperationSnapshot::default(),
        }
    }

    /// Snapshots every operation type that has recorded at least one
    /// attempt so far.
    pub fn snapshot_all(&self) -> std::collections::HashMap<OperationHint, OperationSnapshot> {
        self.by_op.iter().map(|entry| (*entry.key(), to_snapshot(entry.value()))).collect()
    }
}

fn to_snapshot(counters: &OperationCounters) -> OperationSnapshot {
    let total = counters.total.load(Ordering::Relaxed);
    let successful = counters.successful.load(Ordering::Relaxed);
    let failed = counters.failed.load(Ordering::Relaxed);
    let total_duration = Duration::from_nanos(counters.total_duration_nanos.load(Ordering::Relaxed));
    let completed = successful + failed;
    let avg_duration = if completed > 0 { total_duration / completed as u32 } else { Duration::ZERO };
    let last_op_time_nanos = counters.last_op_time_nanos.load(Ordering::Relaxed);

    OperationSnapshot {
        total,
        successful,
        failed,
        retries: counters.retries.load(Ordering::Relaxed),
        circuit_rejections: counters.circuit_rejections.load(Ordering::Relaxed),
        circuit_trips: counters.circuit_trips.load(Ordering::Relaxed),
        timeouts: counters.timeouts.load(Ordering::Relaxed),
        total_duration,
        avg_duration,
        last_op_time: if last_op_time_nanos > 0 { Some(Duration::from_nanos(last_op_time_nanos)) } else { None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counters_accumulate_independently_per_operation_type() {
        let counters = ResilienceCounters::new();
        counters.record_attempt(OperationHint::Read);
        counters.record_attempt(OperationHint::Read);
        counters.record_retries(OperationHint::Read, 1);
        counters.record_success(OperationHint::Read, Duration::from_millis(10));

        counters.record_attempt(OperationHint::Write);
        counters.record_failure(OperationHint::Write, Duration::from_millis(5));

        let read = counters.snapshot(OperationHint::Read);
        assert_eq!(read.total, 2);
        assert_eq!(read.retries, 1);
        assert_eq!(read.successful, 1);
        assert_eq!(read.failed, 0);

        let write = counters.snapshot(OperationHint::Write);
        assert_eq!(write.total, 1);
        assert_eq!(write.failed, 1);
        assert_eq!(write.successful, 0);
    }

    #[test]
    fn duration_tracking_computes_average_and_last_op_time() {
        let counters = ResilienceCounters::new();
        counters.record_success(OperationHint::Query, Duration::from_millis(10));
        counters.record_success(OperationHint::Query, Duration::from_millis(30));

        let snap = counters.snapshot(OperationHint::Query);
        assert_eq!(snap.successful, 2);
        assert_eq!(snap.total_duration, Duration::from_millis(40));
        assert_eq!(snap.avg_duration, Duration::from_millis(20));
        assert!(snap.last_op_time.is_some());
    }

    #[test]
    fn untouched_operation_type_snapshots_to_default() {
        let counters = ResilienceCounters::new();
        let snap = counters.snapshot(OperationHint::Delete);
        assert_eq!(snap, OperationSnapshot::default());
    }
}
