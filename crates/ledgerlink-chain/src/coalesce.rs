//! Keyed request coalescing.
//!
//! Concurrent requests for the same key (`"transaction:<hash>"`,
//! `"transactionReceipt:<hash>"`, `"block:<n>"`) share one in-flight
//! future, so they cost one network call. A semaphore bounds how many
//! distinct requests run at once.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Semaphore;

use crate::error::SyncError;

type SharedRequest<T> = Shared<BoxFuture<'static, Result<T, SyncError>>>;

/// An in-flight request and the generation that registered it.
type Entry<T> = (u64, SharedRequest<T>);

pub struct RequestQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    inflight: Arc<Mutex<HashMap<String, Entry<T>>>>,
    permits: Arc<Semaphore>,
    running: AtomicBool,
    generation: AtomicU64,
}

impl<T> RequestQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_permits(Arc::new(Semaphore::new(max_concurrent.max(1))))
    }

    /// Share a concurrency budget with other queues.
    pub fn with_permits(permits: Arc<Semaphore>) -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            permits,
            running: AtomicBool::new(true),
            generation: AtomicU64::new(0),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Refuse new requests and forget in-flight ones. Current waiters still
    /// receive their result.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.inflight.lock().clear();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests currently in flight.
    pub fn pending(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Run `make()` under `key`, or join the request already running for it.
    pub async fn request<F, Fut>(&self, key: impl Into<String>, make: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        if !self.is_running() {
            return Err(SyncError::QueueStopped);
        }

        let key = key.into();
        let shared = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some((_, existing)) => {
                    tracing::trace!("Joining in-flight request {}", key);
                    existing.clone()
                }
                None => {
                    let permits = Arc::clone(&self.permits);
                    let registry = Arc::clone(&self.inflight);
                    let own_key = key.clone();
                    let own_generation = self.generation.fetch_add(1, Ordering::SeqCst);
                    let request = make();
                    let task: SharedRequest<T> = async move {
                        let _permit = permits
                            .acquire_owned()
                            .await
                            .map_err(|_| SyncError::QueueStopped)?;
                        let result = request.await;
                        // A stop/start may have registered a newer request under this key.
                        let mut inflight = registry.lock();
                        if inflight.get(&own_key).is_some_and(|(g, _)| *g == own_generation) {
                            inflight.remove(&own_key);
                        }
                        drop(inflight);
                        result
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, (own_generation, task.clone()));
                    task
                }
            }
        };

        shared.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_call() {
        let queue = RequestQueue::<u32>::new(4);
        let calls = Arc::new(AtomicUsize::new(0));

        let make = || {
            let calls = calls.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(7)
            }
        };

        let (a, b) = tokio::join!(
            queue.request("transaction:0x1", make()),
            queue.request("transaction:0x1", make()),
        );
        assert_eq!(a, Ok(7));
        assert_eq!(b, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_coalesce() {
        let queue = RequestQueue::<u32>::new(4);
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = calls.clone();
        let c2 = calls.clone();

        let (a, b) = tokio::join!(
            queue.request("block:1", move || async move {
                c1.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }),
            queue.request("block:2", move || async move {
                c2.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            }),
        );
        assert_eq!((a, b), (Ok(1), Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_shared_and_not_cached() {
        let queue = RequestQueue::<u32>::new(1);
        let first = queue
            .request("k", || async { Err(SyncError::Network("down".into())) })
            .await;
        assert_eq!(first, Err(SyncError::Network("down".into())));

        let second = queue.request("k", || async { Ok(3) }).await;
        assert_eq!(second, Ok(3));
    }

    #[tokio::test]
    async fn test_stopped_queue_rejects() {
        let queue = RequestQueue::<u32>::new(1);
        queue.stop();
        assert_eq!(
            queue.request("k", || async { Ok(1) }).await,
            Err(SyncError::QueueStopped)
        );
        queue.start();
        assert_eq!(queue.request("k", || async { Ok(1) }).await, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_request_keeps_newer_entry() {
        let queue = Arc::new(RequestQueue::<u32>::new(4));
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = |millis: u64, value: u32| {
            let calls = calls.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(value)
            }
        };

        let q = queue.clone();
        let first = tokio::spawn({
            let make = slow(100, 1);
            async move { q.request("block:9", make).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        queue.stop();
        queue.start();
        let q = queue.clone();
        let second = tokio::spawn({
            let make = slow(300, 2);
            async move { q.request("block:9", make).await }
        });
        tokio::time::sleep(Duration::from_millis(140)).await;

        assert_eq!(first.await.unwrap(), Ok(1));
        assert_eq!(queue.pending(), 1);

        let third = queue.request("block:9", slow(10, 3)).await;
        assert_eq!(third, Ok(2));
        assert_eq!(second.await.unwrap(), Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.pending(), 0);
    }
}
