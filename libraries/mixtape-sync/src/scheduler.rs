//! Delayed tasks with cancellation handles
//!
//! Every task is tied to a child of the scheduler's root token, so a single
//! [`Scheduler::shutdown`] cancels all pending work.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Clone, Default)]
pub struct Scheduler {
    root: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay` unless cancelled first
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.root.child_token();
        let handle = TaskHandle {
            token: token.clone(),
        };

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => trace!("Scheduled task cancelled"),
                () = tokio::time::sleep(delay) => {
                    // Cancelling from here on no longer stops the task
                    task.await;
                }
            }
        });

        handle
    }

    /// Token cancelled when the scheduler shuts down
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

#[derive(Debug, Clone)]
pub struct TaskHandle {
    token: CancellationToken,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Coalesces bursts: each trigger resets the timer and only the last
/// scheduled task runs
#[derive(Clone)]
pub struct Debouncer {
    scheduler: Scheduler,
    delay: Duration,
    pending: Arc<Mutex<Option<TaskHandle>>>,
}

impl Debouncer {
    pub fn new(scheduler: Scheduler, delay: Duration) -> Self {
        Self {
            scheduler,
            delay,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn trigger<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.cancel();
        }
        *pending = Some(self.scheduler.schedule(self.delay, task));
    }

    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.cancel();
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn scheduled_task_runs_after_delay() {
        let scheduler = Scheduler::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ran);
        let _handle = scheduler.schedule(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_runs() {
        let scheduler = Scheduler::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ran);
        let handle = scheduler.schedule(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        assert!(handle.is_cancelled());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_tasks() {
        let scheduler = Scheduler::new();
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&ran);
            let _ = scheduler.schedule(Duration::from_millis(50), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        scheduler.shutdown();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_shut_down());
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_runs_only_the_last_trigger() {
        let debouncer = Debouncer::new(Scheduler::new(), Duration::from_millis(100));
        let runs = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let runs = Arc::clone(&runs);
            debouncer.trigger(async move {
                runs.lock().unwrap().push(i);
            });
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*runs.lock().unwrap(), [4]);
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_separate_bursts_each_run() {
        let debouncer = Debouncer::new(Scheduler::new(), Duration::from_millis(100));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter = Arc::clone(&runs);
            debouncer.trigger(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        let counter = Arc::clone(&runs);
        debouncer.trigger(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
