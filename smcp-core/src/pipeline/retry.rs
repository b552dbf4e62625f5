//! Exponential backoff for transient storage failures.

use crate::config::RetryConfig;
use crate::error::StorageError;
use std::future::Future;
use std::time::Duration;

/// Run `operation`, retrying transient failures with exponential backoff.
///
/// `NotFound` and referential-integrity failures surface immediately.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    what: &str,
    operation: F,
) -> Result<T, StorageError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !e.is_transient() || attempt >= config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt);
                tracing::warn!(
                    operation = what,
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient storage error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// `initial * multiplier^attempt`, capped at `max_backoff_ms`.
pub fn compute_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64
        * config
            .backoff_multiplier
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    base.min(config.max_backoff_ms as f64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let config = RetryConfig::default();
        assert_eq!(compute_backoff(&config, 0), 200);
        assert_eq!(compute_backoff(&config, 1), 400);
        assert_eq!(compute_backoff(&config, 2), 800);
        assert_eq!(compute_backoff(&config, 10), 5_000);
    }

    #[tokio::test]
    async fn test_transient_error_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(&fast(), "fetch", || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StorageError::unavailable("flaky"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = with_retry(&fast(), "fetch", || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::unavailable("down"))
            }
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_not_found_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = with_retry(&fast(), "fetch", || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::not_found("model", "m1"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
