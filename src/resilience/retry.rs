//! Exponential backoff retry policy (spec §4.8), adapted from a
//! load-balancer's `retry::RetryPolicy`.

use crate::error::{ErrorKind, Result};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_retries: u32,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
            max_retries,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Timeout errors use a doubled base delay (spec §7 Retryability).
    fn base_delay_for(&self, kind: ErrorKind) -> Duration {
        if kind == ErrorKind::Timeout {
            self.initial_delay * 2
        } else {
            self.initial_delay
        }
    }

    /// Public entry point for composite wrappers that drive their own retry
    /// loop instead of calling [`Self::execute`] directly.
    pub fn delay_for_retry(&self, attempt: u32, kind: ErrorKind) -> Duration {
        self.delay_for_attempt(attempt, kind)
    }

    fn delay_for_attempt(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let base_ms = self.base_delay_for(kind).as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        let mut delay = Duration::from_millis(delay_ms as u64).min(self.max_delay);

        if self.jitter {
            let jitter_ms = rand::random::<f64>() * delay.as_millis() as f64;
            delay = (delay + Duration::from_millis(jitter_ms as u64)).min(self.max_delay);
        }

        delay
    }

    /// Execute `operation`, retrying on retryable error kinds up to
    /// `max_retries` additional attempts (spec §8: invoked exactly
    /// `min(N+1, first-success-attempt)` times for a retryable error, exactly
    /// once for a non-retryable one).
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.execute_counted(operation).await.0
    }

    /// As [`Self::execute`], but also returns how many retry attempts were
    /// made beyond the first, so callers can attribute them to per-op-type
    /// metrics (spec §4.8 "retries" counter).
    pub async fn execute_counted<F, Fut, T>(&self, mut operation: F) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(value) => return (Ok(value), attempt),
                Err(err) => {
                    let kind = err.kind();
                    if !kind.is_retryable() || attempt >= self.max_retries {
                        return (Err(err), attempt);
                    }

                    let delay = self.delay_for_attempt(attempt, kind);
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), 2.0, Duration::from_secs(30), 3).with_jitter(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_retryable_error_until_success() {
        let policy = RetryPolicy::new(Duration::from_millis(1), 2.0, Duration::from_millis(50), 3);
        let attempts = AtomicU32::new(0);

        let result = policy
            .execute(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StorageError::operation(ErrorKind::Timeout, "get", "slow"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_runs_once() {
        let policy = RetryPolicy::new(Duration::from_millis(1), 2.0, Duration::from_millis(50), 5);
        let attempts = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(StorageError::invalid_request("put", "bad input")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_max_retries() {
        let policy = RetryPolicy::new(Duration::from_millis(1), 2.0, Duration::from_millis(50), 2);
        let attempts = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(StorageError::operation(ErrorKind::ConnectionFailed, "get", "down")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3); // initial + 2 retries
    }
}
