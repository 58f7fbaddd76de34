//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples lifecycle orchestration from the host
//! scheduler (time, task spawning, end-of-frame deferral). This enables:
//!
//! - Deterministic Simulation: the harness provides a virtual clock and a
//!   manually flushed defer queue, so frame ordering is reproducible.
//!
//! - Production Runtime: `SystemEnv` uses tokio tasks and the system clock
//!   without any changes to the orchestration logic.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Deferral: a job passed to `defer` never runs inside the `defer` call
//! - Isolation: Implementations must not share global state

use std::{
    future::Future,
    pin::Pin,
    time::{Duration, Instant},
};

/// Boxed, sendable future used at every dynamic async seam.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Work queued with [`Environment::defer`].
pub type DeferredJob = Box<dyn FnOnce() + Send + 'static>;

/// Abstract environment providing time and task scheduling.
///
/// Start hooks and frame callbacks are dispatched through this trait, which
/// is what makes the `spawn` and `defer` dispatch modes testable.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls must return times >= previous calls.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only frame drivers should call this, never hook code.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Runs `task` as an independent concurrent task.
    ///
    /// The caller never observes the task's completion.
    fn spawn(&self, task: BoxFuture<'static, ()>);

    /// Queues `job` to run after the current frame (or, outside a frame
    /// driver, after the current task yields).
    fn defer(&self, job: DeferredJob);
}
