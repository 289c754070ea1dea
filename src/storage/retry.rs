use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::error::Result;

/// Bounded retry policy for transient storage failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt before the error is returned.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Run `op`, retrying only retryable errors (see
/// [`IntakeError::is_retryable`](crate::error::IntakeError::is_retryable)).
pub async fn with_retry<T, F, Fut>(policy: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay_ms = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    operation = what,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms,
                    error = %err,
                    "Retrying storage operation",
                );
                sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::IntakeError;

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 1,
        }
    }

    #[test]
    fn exponential_backoff() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 100,
        };
        assert_eq!(config.delay_for_attempt(1), 100);
        assert_eq!(config.delay_for_attempt(2), 200);
        assert_eq!(config.delay_for_attempt(3), 400);
        assert_eq!(config.delay_for_attempt(4), 800);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = with_retry(&fast(3), "put", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(IntakeError::StorageUnavailable("busy".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(&fast(2), "get", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(IntakeError::StorageUnavailable("down".into()))
        })
        .await;
        assert!(matches!(result, Err(IntakeError::StorageUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(&fast(5), "get", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(IntakeError::ArtifactNotFound("x/input".into()))
        })
        .await;
        assert!(matches!(result, Err(IntakeError::ArtifactNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
