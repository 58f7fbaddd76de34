//! Production Environment implementation using the system clock and tokio.

use std::time::Duration;

use crate::env::{BoxFuture, DeferredJob, Environment};

/// Production environment backed by the ambient tokio runtime.
///
/// This implementation:
/// - Uses `std::time::Instant::now()` for time
/// - Uses `tokio::time::sleep()` for async sleeping
/// - Uses `tokio::spawn()` for spawned work
/// - Runs deferred jobs on a task that first yields once
///
/// Spawning and deferring require a tokio runtime to be running.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn spawn(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }

    fn defer(&self, job: DeferredJob) {
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            job();
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn sleep_follows_the_system_clock() {
        let env = SystemEnv::new();
        let before = env.now();

        env.sleep(Duration::from_millis(20)).await;

        assert!(env.now() - before >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn spawned_task_runs_on_the_runtime() {
        let env = SystemEnv::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        env.spawn(Box::pin(async move {
            let _ = tx.send(7);
        }));

        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn deferred_job_does_not_run_inline() {
        let env = SystemEnv::new();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        env.defer(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(!ran.load(Ordering::SeqCst));

        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(ran.load(Ordering::SeqCst));
    }
}
