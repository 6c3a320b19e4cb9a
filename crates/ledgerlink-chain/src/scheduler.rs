//! Cancellable timer queue owned by a module context.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Spawns delayed and periodic tasks that all stop on [`TaskScheduler::cancel_all`].
///
/// After cancellation the scheduler is immediately usable again; only tasks
/// spawned before the call are affected.
#[derive(Debug, Default)]
pub struct TaskScheduler {
    token: Mutex<CancellationToken>,
    tracker: TaskTracker,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&self) -> CancellationToken {
        self.token.lock().clone()
    }

    /// Run `task` now, unless cancelled first.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = task => {}
            }
        });
    }

    /// Run `task` after `delay`, unless cancelled first.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
    }

    /// Run `make()` every `period`, first run one period from now.
    pub fn schedule_every<F, Fut>(&self, period: Duration, mut make: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                make().await;
            }
        });
    }

    /// Cancel everything spawned so far.
    pub fn cancel_all(&self) {
        let mut token = self.token.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Tasks spawned and not yet finished.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_schedule_runs_after_delay() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        scheduler.schedule(Duration::from_secs(5), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_drops_pending_tasks() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        scheduler.schedule(Duration::from_secs(5), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.cancel_all();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.active_tasks(), 0);

        let h = hits.clone();
        scheduler.schedule(Duration::from_secs(1), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_every() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        scheduler.schedule_every(Duration::from_secs(10), move || {
            let h = h.clone();
            async move {
                h.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        scheduler.cancel_all();
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
