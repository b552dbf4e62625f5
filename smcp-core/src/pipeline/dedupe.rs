//! Per-key deduplication of in-flight runs.
//!
//! The first request for a key spawns the run; requests arriving while it is
//! in flight await the same shared outcome. The entry is removed when the run
//! finishes, so a later request starts a fresh run.

use crate::error::SmcpError;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

type SharedRun<T> = Shared<BoxFuture<'static, Result<T, SmcpError>>>;
type RunMap<K, T> = Arc<Mutex<HashMap<K, SharedRun<T>>>>;

/// Map of runs currently executing, keyed by `K`.
pub struct InFlight<K, T> {
    runs: RunMap<K, T>,
}

impl<K, T> Default for InFlight<K, T> {
    fn default() -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn lock<K, T>(runs: &RunMap<K, T>) -> MutexGuard<'_, HashMap<K, SharedRun<T>>> {
    // The map is never left half-updated, so a poisoned lock is still usable.
    runs.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, T> InFlight<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Display + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Await the run for `key`, starting it with `start` if none is in flight.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Result<T, SmcpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SmcpError>> + Send + 'static,
    {
        let shared = {
            let mut runs = lock(&self.runs);
            if let Some(existing) = runs.get(&key) {
                debug!(key = %key, "Joining in-flight run");
                existing.clone()
            } else {
                let registry = Arc::clone(&self.runs);
                let task_key = key.clone();
                let run = start();
                let handle = tokio::spawn(async move {
                    let result = run.await;
                    lock(&registry).remove(&task_key);
                    result
                });
                let shared = async move {
                    handle
                        .await
                        .map_err(|e| SmcpError::internal(format!("evaluation task failed: {e}")))?
                }
                .boxed()
                .shared();
                runs.insert(key, shared.clone());
                shared
            }
        };
        shared.await
    }

    /// Number of keys currently executing.
    pub fn len(&self) -> usize {
        lock(&self.runs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_requests_share_one_run() {
        let in_flight: InFlight<String, usize> = InFlight::new();
        let starts = Arc::new(AtomicUsize::new(0));

        let start = |starts: Arc<AtomicUsize>| {
            move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(starts.fetch_add(1, Ordering::SeqCst) + 1)
            }
        };

        let (a, b) = tokio::join!(
            in_flight.run("k".to_string(), start(Arc::clone(&starts))),
            in_flight.run("k".to_string(), start(Arc::clone(&starts))),
        );
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 1);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let in_flight: InFlight<String, &'static str> = InFlight::new();
        let (a, b) = tokio::join!(
            in_flight.run("a".to_string(), || async { Ok("a") }),
            in_flight.run("b".to_string(), || async { Ok("b") }),
        );
        assert_eq!(a.unwrap(), "a");
        assert_eq!(b.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_finished_run_is_not_reused() {
        let in_flight: InFlight<String, usize> = InFlight::new();
        let first = in_flight.run("k".to_string(), || async { Ok(1) }).await;
        let second = in_flight.run("k".to_string(), || async { Ok(2) }).await;
        assert_eq!(first.unwrap(), 1);
        assert_eq!(second.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_errors_are_shared() {
        let in_flight: InFlight<String, usize> = InFlight::new();
        let err = in_flight
            .run("k".to_string(), || async {
                Err(SmcpError::internal("boom"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
        assert!(in_flight.is_empty());
    }
}
