use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Deferred-task scheduling: run a closure once after a delay, or repeatedly at an interval,
/// with explicit cancel semantics. The reassembly store uses this for timeout eviction;
/// callers can use it for periodic sends.
///
/// Backed by `tokio::time`, so tests with a paused clock (`start_paused`) drive task firing
/// deterministically via `tokio::time::advance`.
pub struct TaskManager;

impl TaskManager {
    pub fn after(delay: Duration) -> Schedule {
        Schedule {
            delay,
            interval: None,
        }
    }
}

pub struct Schedule {
    delay: Duration,
    interval: Option<Duration>,
}

impl Schedule {
    const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

    pub fn every(mut self, interval: Duration) -> Schedule {
        self.interval = Some(interval);
        self
    }

    /// schedules a one-shot task
    pub fn once<F, Fut>(self, task: F) -> TaskHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let join = tokio::spawn(async move {
            tokio::time::sleep(self.delay).await;
            task().await;
        });
        TaskHandle { join }
    }

    /// schedules a periodic task: first run after the delay, then once per interval
    pub fn run<F, Fut>(self, task: F) -> TaskHandle
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let interval = self.interval.unwrap_or(Self::DEFAULT_INTERVAL);
        let join = tokio::spawn(async move {
            tokio::time::sleep(self.delay).await;
            loop {
                task().await;
                tokio::time::sleep(interval).await;
            }
        });
        TaskHandle { join }
    }
}

/// Cancellable handle to a scheduled task. Dropping the handle does not cancel the task.
pub struct TaskHandle {
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::time;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        TaskManager::after(Duration::from_secs(5)).once(move || async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::task::yield_now().await;

        time::advance(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let handle = TaskManager::after(Duration::from_secs(5)).once(move || async move {
            f.fetch_add(1, Ordering::SeqCst);
        });

        handle.cancel();
        time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_fires_repeatedly() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let handle = TaskManager::after(Duration::from_secs(1))
            .every(Duration::from_secs(2))
            .run(move || {
                let f = f.clone();
                async move {
                    f.fetch_add(1, Ordering::SeqCst);
                }
            });
        tokio::task::yield_now().await;

        time::advance(Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        handle.cancel();
        time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }
}
