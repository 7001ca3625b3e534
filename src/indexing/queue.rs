//! Bounded, optionally-priority-laned request queue for the indexing
//! pipeline (spec §4.9 "Queue discipline").
//!
//! The plain variant is a single bounded FIFO. The three-lane priority
//! variant always drains high before normal before low; within a lane,
//! FIFO order is preserved (spec §5 "Index-request order is preserved
//! within a single priority lane; across lanes, high before normal before
//! low").

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOperation {
    Add,
    Update,
    Delete,
}

/// A unit of indexing work (spec §3 IndexRequest).
#[derive(Debug, Clone)]
pub struct IndexRequest {
    pub operation: IndexOperation,
    pub path: String,
    pub cid: Option<String>,
    pub metadata: HashMap<String, String>,
    pub priority: i32,
    pub enqueued_at: SystemTime,
}

impl IndexRequest {
    pub fn new(operation: IndexOperation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            cid: None,
            metadata: HashMap::new(),
            priority: 5,
            enqueued_at: SystemTime::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cid(mut self, cid: impl Into<String>) -> Self {
        self.cid = Some(cid.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    High,
    Normal,
    Low,
}

/// ≥8 is high, ≤3 is low, else normal (spec §4.9).
fn lane_for(priority: i32) -> Lane {
    if priority >= 8 {
        Lane::High
    } else if priority <= 3 {
        Lane::Low
    } else {
        Lane::Normal
    }
}

struct Lanes {
    high: VecDeque<IndexRequest>,
    normal: VecDeque<IndexRequest>,
    low: VecDeque<IndexRequest>,
}

impl Lanes {
    fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    fn push(&mut self, req: IndexRequest) {
        match lane_for(req.priority) {
            Lane::High => self.high.push_back(req),
            Lane::Normal => self.normal.push_back(req),
            Lane::Low => self.low.push_back(req),
        }
    }

    fn pop(&mut self) -> Option<IndexRequest> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }
}

/// Bounded FIFO with optional three-lane priority discipline (spec §4.9).
/// Capacity is sized by the caller, conventionally ≈ 2×batch-size.
pub struct IndexQueue {
    lanes: Mutex<Lanes>,
    capacity: usize,
    notify_not_empty: Notify,
    notify_not_full: Notify,
    closed: AtomicBool,
}

impl IndexQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            lanes: Mutex::new(Lanes {
                high: VecDeque::new(),
                normal: VecDeque::new(),
                low: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            notify_not_empty: Notify::new(),
            notify_not_full: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn len(&self) -> usize {
        self.lanes.lock().await.len()
    }

    /// Enqueue, waiting up to `wait` for room. Returns `queue-full` on
    /// timeout (spec §4.9, §5 Backpressure).
    pub async fn enqueue(&self, req: IndexRequest, wait: Duration) -> Result<()> {
        let deadline = Instant::now() + wait;

        loop {
            {
                let mut lanes = self.lanes.lock().await;
                // Re-checked under the same lock that guards push/pop so a
                // concurrent close() can't slip in between this check and
                // the push below and accept a request no worker will ever
                // see.
                if self.closed.load(Ordering::SeqCst) {
                    return Err(StorageError::operation(ErrorKind::InvalidRequest, "enqueue", "queue is closed"));
                }
                if lanes.len() < self.capacity {
                    lanes.push(req);
                    self.notify_not_empty.notify_one();
                    return Ok(());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(StorageError::QueueFull(format!(
                    "index queue at capacity ({})",
                    self.capacity
                )));
            }

            tokio::select! {
                _ = tokio::time::sleep(deadline - now) => {}
                _ = self.notify_not_full.notified() => {}
            }
        }
    }

    /// Dequeue the next request, draining high before normal before low.
    /// Returns `None` when the queue is closed and drained, or when
    /// `cancel` fires.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<IndexRequest> {
        loop {
            {
                let mut lanes = self.lanes.lock().await;
                if let Some(req) = lanes.pop() {
                    self.notify_not_full.notify_one();
                    return Some(req);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify_not_empty.notified() => {}
            }
        }
    }

    /// Closes the queue; workers drain what remains and then exit (spec
    /// §4.9 "Workers terminate when the queue closes").
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify_not_empty.notify_waiters();
        self.notify_not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
