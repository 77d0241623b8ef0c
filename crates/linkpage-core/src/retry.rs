//! Retry-with-backoff for read paths that hit a transient store failure.
//!
//! Only failures that look like connectivity or timeout problems are retried.
//! Everything else is returned on the first attempt. The backoff sleep is a
//! tokio timer, so only the calling task is suspended.

use crate::error::{PersistError, StoreError};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);

/// Attempt budget and base delay for `with_transient_retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts that end in a retryable failure before giving up.
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    /// At least one attempt always runs.
    fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay after 0-indexed attempt `n`: `initial_delay * 2^n`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }
}

/// Why a retried operation ultimately failed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Not a transient failure; returned without retrying.
    #[error("{0}")]
    Permanent(E),

    /// Every attempt failed transiently. Carries the last failure.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(err) => err,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Failures that can tell whether retrying them might help.
pub trait TransientFailure {
    fn is_transient(&self) -> bool;
}

/// Message-based classification for errors that carry no structure.
///
/// Matches `timeout` in any case (which covers `connect timeout`) and the
/// exact phrase `fetch failed`.
pub fn message_is_transient(message: &str) -> bool {
    message.to_lowercase().contains("timeout") || message.contains("fetch failed")
}

impl TransientFailure for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout(_) | StoreError::Connection(_) => true,
            StoreError::Backend(message) => message_is_transient(message),
        }
    }
}

impl TransientFailure for PersistError {
    fn is_transient(&self) -> bool {
        matches!(self, PersistError::Transient(_))
    }
}

impl TransientFailure for String {
    fn is_transient(&self) -> bool {
        message_is_transient(self)
    }
}

impl TransientFailure for std::io::Error {
    fn is_transient(&self) -> bool {
        use std::io::ErrorKind;
        matches!(
            self.kind(),
            ErrorKind::TimedOut
                | ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
        ) || message_is_transient(&self.to_string())
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
pub async fn with_transient_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: TransientFailure + fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(op = op_name, attempts = attempt + 1, "Operation recovered after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(RetryError::Permanent(err)),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    warn!(op = op_name, attempts = attempt, error = %err, "Retries exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }

                let delay = policy.delay_for(attempt - 1);
                warn!(
                    op = op_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_message_classification() {
        assert!(message_is_transient("request Timeout after 5s"));
        assert!(message_is_transient("connect timeout"));
        assert!(message_is_transient("TypeError: fetch failed"));
        assert!(!message_is_transient("Fetch Failed"));
        assert!(!message_is_transient("unique constraint violated"));
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_two_timeouts() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = with_transient_retry(&policy, "resolve", || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(StoreError::Timeout("read".into()))
                } else {
                    Ok("page-1")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "page-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1000ms after the first failure, 2000ms after the second
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result: Result<(), _> = with_transient_retry(&policy, "resolve", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Backend("permission denied".into()))
            }
        })
        .await;

        match result {
            Err(RetryError::Permanent(StoreError::Backend(msg))) => {
                assert_eq!(msg, "permission denied")
            }
            other => panic!("expected permanent failure, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = with_transient_retry(&policy, "resolve", || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(format!("fetch failed (attempt {})", n))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_exhausted());
        match err {
            RetryError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "fetch failed (attempt 2)");
            }
            RetryError::Permanent(_) => unreachable!(),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = with_transient_retry(&policy, "resolve", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Connection("refused".into()))
            }
        })
        .await;

        assert!(result.unwrap_err().is_exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
