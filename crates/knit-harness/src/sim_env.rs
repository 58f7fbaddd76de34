//! Simulated environment with a virtual clock.
//!
//! Time only moves when the harness advances it, spawned tasks are tracked
//! so a test can wait for all of them, and deferred jobs queue up until the
//! harness flushes them at the end of a simulated frame.

use std::{
    collections::VecDeque,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use knit_core::{BoxFuture, DeferredJob, Environment};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

struct Inner {
    origin: Instant,
    elapsed: Mutex<Duration>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    deferred: Mutex<VecDeque<DeferredJob>>,
}

/// Deterministic [`Environment`] for simulations and tests.
///
/// Spawning still needs a tokio runtime; everything else is driven by the
/// harness.
#[derive(Clone)]
pub struct SimEnv {
    inner: Arc<Inner>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment at virtual time zero.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                origin: Instant::now(),
                elapsed: Mutex::new(Duration::ZERO),
                tasks: Mutex::new(Vec::new()),
                deferred: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        *self.inner.elapsed.lock()
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, by: Duration) {
        *self.inner.elapsed.lock() += by;
    }

    /// Run every deferred job, including jobs deferred while flushing.
    /// Returns how many ran.
    pub fn flush_deferred(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.inner.deferred.lock().pop_front();
            let Some(job) = next else { break };
            job();
            ran += 1;
        }
        ran
    }

    /// Deferred jobs waiting for the next flush.
    pub fn pending_deferred(&self) -> usize {
        self.inner.deferred.lock().len()
    }

    /// Wait until every spawned task, including tasks spawned meanwhile,
    /// has finished.
    pub async fn settle(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.inner.tasks.lock());
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "simulated task did not complete");
                }
            }
        }
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        self.inner.origin + self.elapsed()
    }

    /// Advances the virtual clock and yields once.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.advance(duration);
        tokio::task::yield_now()
    }

    fn spawn(&self, task: BoxFuture<'static, ()>) {
        let handle = tokio::spawn(task);
        self.inner.tasks.lock().push(handle);
    }

    fn defer(&self, job: DeferredJob) {
        self.inner.deferred.lock().push_back(job);
    }
}
