//! Bounded retry with linear backoff
//!
//! The wait before attempt `n + 1` is `base_delay * n`. Every wait is logged at
//! warn level with the operation label, so a stalled run explains itself.

use crate::error::{IngestError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of attempts for a guarded operation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay between attempts. Actual delay is this value multiplied by the
/// attempt number that just failed.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Wait applied after the given (1-based) attempt fails
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Exhaustion and permanent failures both surface as
    /// [`IngestError::OperationFailed`] wrapping the last error.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                },
                Err(err) if err.is_permanent() || attempt >= max_attempts => {
                    return Err(IngestError::OperationFailed {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                },
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt {}/{} failed, retrying in {:?}",
                        attempt,
                        max_attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transient() -> IngestError {
        IngestError::Database(sqlx::Error::PoolTimedOut)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_with_linear_backoff() {
        let policy = RetryPolicy::default();
        let started = Instant::now();
        let mut seen = Vec::new();

        let value = policy
            .run("insert btc_blocks batch", || {
                seen.push(started.elapsed());
                let attempt = seen.len();
                async move {
                    if attempt < 3 {
                        Err(transient())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(
            seen,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(3)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_names_operation_and_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let err = policy
            .run("prepare btc_blocks statement", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(transient()) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            IngestError::OperationFailed {
                operation,
                attempts,
                ..
            } => {
                assert_eq!(operation, "prepare btc_blocks statement");
                assert_eq!(attempts, 3);
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let err = RetryPolicy::default()
            .run("insert btc_transactions batch", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(IngestError::Config("bad statement".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(matches!(err, IngestError::OperationFailed { attempts: 1, .. }));
    }

    #[test]
    fn test_delay_for() {
        let policy = RetryPolicy::new(5, Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(4), Duration::from_secs(1));
    }
}
