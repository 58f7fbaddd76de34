//! Dispatch modes for start hooks and frame callbacks.
//!
//! The mode is applied when a callback is invoked, not baked into the
//! callback when it is registered:
//!
//! - `Inline`: run now; an error propagates to the caller
//! - `Spawn`: run as an independent task; an error lands in the [`FaultLog`]
//! - `Defer`: run after the current frame; an error lands in the
//!   [`FaultLog`]
//!
//! Start hooks may suspend and go through [`Dispatcher::dispatch_task`].
//! Inline awaits them before the next one starts; deferred ones are spawned
//! from the end-of-frame job.

use std::{fmt, str::FromStr, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    env::{BoxFuture, Environment},
    error::{HookResult, KnitError},
    frame::TickPhase,
};

/// How start hooks and frame callbacks are invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Run in the caller's stack.
    Inline,
    /// Run as a new concurrent task.
    #[default]
    Spawn,
    /// Run at the end of the current frame.
    Defer,
}

impl FromStr for DispatchMode {
    type Err = KnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inline" => Ok(Self::Inline),
            "spawn" => Ok(Self::Spawn),
            "defer" => Ok(Self::Defer),
            other => Err(KnitError::InvalidConfig {
                reason: format!("unknown dispatch mode {other:?} (expected inline, spawn or defer)"),
            }),
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inline => "inline",
            Self::Spawn => "spawn",
            Self::Defer => "defer",
        })
    }
}

/// Where a dispatched callback came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOrigin {
    /// A module's start hook.
    Start,
    /// A frame callback bound to this phase.
    Frame(TickPhase),
}

impl FaultOrigin {
    fn into_error(self, module: String, source: crate::error::BoxError) -> KnitError {
        match self {
            Self::Start => KnitError::StartHook { module, source },
            Self::Frame(phase) => KnitError::FrameCallback { module, phase, source },
        }
    }
}

/// A failure of a spawned or deferred callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Module owning the callback.
    pub module: String,
    /// Which callback failed.
    pub origin: FaultOrigin,
    /// Rendered error.
    pub message: String,
}

/// Supervising sink for errors nobody awaits.
#[derive(Clone, Default)]
pub struct FaultLog {
    entries: Arc<Mutex<Vec<Fault>>>,
}

impl FaultLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and keep a fault.
    pub fn record(&self, fault: Fault) {
        tracing::error!(
            module = %fault.module,
            origin = ?fault.origin,
            "detached callback failed: {}",
            fault.message
        );
        self.entries.lock().push(fault);
    }

    /// Every fault recorded so far.
    pub fn snapshot(&self) -> Vec<Fault> {
        self.entries.lock().clone()
    }

    /// Number of recorded faults.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Applies one dispatch mode to every callback it is handed.
#[derive(Clone)]
pub struct Dispatcher<E> {
    mode: DispatchMode,
    env: E,
    faults: FaultLog,
}

impl<E: Environment> Dispatcher<E> {
    /// Dispatcher for `mode`, scheduling through `env`.
    pub fn new(mode: DispatchMode, env: E, faults: FaultLog) -> Self {
        Self { mode, env, faults }
    }

    /// Configured mode.
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Invoke `job` according to the configured mode.
    ///
    /// # Errors
    ///
    /// Only inline dispatch returns the job's error. Spawned and deferred
    /// failures are recorded in the fault log.
    pub fn dispatch<F>(&self, module: &str, origin: FaultOrigin, job: F) -> Result<(), KnitError>
    where
        F: FnOnce() -> HookResult + Send + 'static,
    {
        match self.mode {
            DispatchMode::Inline => {
                job().map_err(|source| origin.into_error(module.to_owned(), source))
            },
            DispatchMode::Spawn => {
                let detached = detach(module.to_owned(), origin, self.faults.clone(), job);
                self.env.spawn(Box::pin(async move { detached() }));
                Ok(())
            },
            DispatchMode::Defer => {
                let detached = detach(module.to_owned(), origin, self.faults.clone(), job);
                self.env.defer(Box::new(detached));
                Ok(())
            },
        }
    }

    /// Invoke a job that may suspend according to the configured mode.
    ///
    /// `job` is called where the future would run, so its synchronous part
    /// is dispatched too.
    ///
    /// # Errors
    ///
    /// Only inline dispatch returns the job's error. Spawned and deferred
    /// failures are recorded in the fault log.
    pub async fn dispatch_task<F>(&self, module: &str, origin: FaultOrigin, job: F) -> Result<(), KnitError>
    where
        F: FnOnce() -> BoxFuture<'static, HookResult> + Send + 'static,
    {
        match self.mode {
            DispatchMode::Inline => job().await.map_err(|source| origin.into_error(module.to_owned(), source)),
            DispatchMode::Spawn => {
                self.env.spawn(supervise(module.to_owned(), origin, self.faults.clone(), job));
                Ok(())
            },
            DispatchMode::Defer => {
                let task = supervise(module.to_owned(), origin, self.faults.clone(), job);
                let env = self.env.clone();
                self.env.defer(Box::new(move || env.spawn(task)));
                Ok(())
            },
        }
    }
}

fn supervise<F>(module: String, origin: FaultOrigin, faults: FaultLog, job: F) -> BoxFuture<'static, ()>
where
    F: FnOnce() -> BoxFuture<'static, HookResult> + Send + 'static,
{
    Box::pin(async move {
        if let Err(e) = job().await {
            faults.record(Fault { module, origin, message: e.to_string() });
        }
    })
}

fn detach<F>(module: String, origin: FaultOrigin, faults: FaultLog, job: F) -> impl FnOnce() + Send
where
    F: FnOnce() -> HookResult + Send + 'static,
{
    move || {
        if let Err(e) = job() {
            faults.record(Fault { module, origin, message: e.to_string() });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
        time::{Duration, Instant},
    };

    use super::*;
    use crate::env::DeferredJob;

    /// Keeps spawned tasks and deferred jobs for manual flush.
    #[derive(Clone, Default)]
    struct QueueEnv {
        spawned: Arc<Mutex<Vec<BoxFuture<'static, ()>>>>,
        deferred: Arc<Mutex<VecDeque<DeferredJob>>>,
    }

    impl QueueEnv {
        fn flush(&self) {
            loop {
                let next = self.deferred.lock().pop_front();
                let Some(job) = next else { break };
                job();
            }
        }

        async fn run_spawned(&self) {
            let tasks: Vec<_> = self.spawned.lock().drain(..).collect();
            for task in tasks {
                task.await;
            }
        }
    }

    impl Environment for QueueEnv {
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            std::future::ready(())
        }

        fn spawn(&self, task: BoxFuture<'static, ()>) {
            self.spawned.lock().push(task);
        }

        fn defer(&self, job: DeferredJob) {
            self.deferred.lock().push_back(job);
        }
    }

    #[test]
    fn parse_dispatch_mode() {
        assert_eq!("inline".parse::<DispatchMode>().unwrap(), DispatchMode::Inline);
        assert_eq!("defer".parse::<DispatchMode>().unwrap(), DispatchMode::Defer);
        assert!(matches!("later".parse::<DispatchMode>(), Err(KnitError::InvalidConfig { .. })));
    }

    #[test]
    fn default_mode_is_spawn() {
        assert_eq!(DispatchMode::default(), DispatchMode::Spawn);
    }

    #[test]
    fn inline_error_propagates() {
        let dispatcher = Dispatcher::new(DispatchMode::Inline, QueueEnv::default(), FaultLog::new());

        let result = dispatcher.dispatch("Clock", FaultOrigin::Start, || Err("boom".into()));
        assert!(matches!(result, Err(KnitError::StartHook { module, .. }) if module == "Clock"));
    }

    #[test]
    fn deferred_job_waits_for_flush() {
        let env = QueueEnv::default();
        let faults = FaultLog::new();
        let dispatcher = Dispatcher::new(DispatchMode::Defer, env.clone(), faults.clone());
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        dispatcher
            .dispatch("Clock", FaultOrigin::Frame(TickPhase::Heartbeat), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("late".into())
            })
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        env.flush();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let recorded = faults.snapshot();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].origin, FaultOrigin::Frame(TickPhase::Heartbeat));
        assert_eq!(recorded[0].message, "late");
    }

    fn suspending_job(runs: &Arc<AtomicUsize>, fail: bool) -> impl FnOnce() -> BoxFuture<'static, HookResult> + Send + use<> {
        let runs = Arc::clone(runs);
        move || -> BoxFuture<'static, HookResult> {
            Box::pin(async move {
                tokio::task::yield_now().await;
                runs.fetch_add(1, Ordering::SeqCst);
                if fail { Err("remote refused".into()) } else { Ok(()) }
            })
        }
    }

    #[tokio::test]
    async fn inline_task_is_awaited() {
        let dispatcher = Dispatcher::new(DispatchMode::Inline, QueueEnv::default(), FaultLog::new());
        let runs = Arc::new(AtomicUsize::new(0));

        dispatcher.dispatch_task("Shop", FaultOrigin::Start, suspending_job(&runs, false)).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let result = dispatcher.dispatch_task("Shop", FaultOrigin::Start, suspending_job(&runs, true)).await;
        assert!(matches!(result, Err(KnitError::StartHook { module, .. }) if module == "Shop"));
    }

    #[tokio::test]
    async fn spawned_task_failure_is_recorded() {
        let env = QueueEnv::default();
        let faults = FaultLog::new();
        let dispatcher = Dispatcher::new(DispatchMode::Spawn, env.clone(), faults.clone());
        let runs = Arc::new(AtomicUsize::new(0));

        dispatcher.dispatch_task("Shop", FaultOrigin::Start, suspending_job(&runs, true)).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        env.run_spawned().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(faults.snapshot()[0].message, "remote refused");
    }

    #[tokio::test]
    async fn deferred_task_is_spawned_after_flush() {
        let env = QueueEnv::default();
        let dispatcher = Dispatcher::new(DispatchMode::Defer, env.clone(), FaultLog::new());
        let runs = Arc::new(AtomicUsize::new(0));

        dispatcher.dispatch_task("Shop", FaultOrigin::Start, suspending_job(&runs, false)).await.unwrap();
        env.run_spawned().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        env.flush();
        env.run_spawned().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
