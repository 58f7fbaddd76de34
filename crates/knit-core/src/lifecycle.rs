//! Lifecycle orchestrator.
//!
//! Owns one side's registry and drives the single startup pass:
//!
//! 1. `NotStarted -> Starting`, freezing the registry
//! 2. bind (the caller's side-specific step, e.g. server endpoints)
//! 3. init: every init hook concurrently, failures isolated and reported
//! 4. start: start hooks in registration order, per the dispatch mode
//! 5. frame queues populated in registration order and bound once
//! 6. `Started`; the startup latch releases every waiter
//!
//! Nothing after step 1 is cancellable and nothing is retried. A second
//! start fails with `AlreadyStarted` without touching the first pass.

use std::{
    any::Any,
    fmt,
    future::Future,
    sync::{Arc, OnceLock},
    task::{Context, Poll, Waker},
};

use crate::{
    config::LifecycleConfig,
    dispatch::{Dispatcher, FaultLog, FaultOrigin},
    env::{BoxFuture, Environment},
    error::{HookResult, KnitError},
    frame::{BoundFrames, FrameQueues, Tick, TickPhase, TickSource},
    latch::StartLatch,
    registry::{Registry, StartupState},
};

/// Init hook. Receives a context for sibling access and may suspend.
pub type InitHook<M> = Arc<dyn Fn(InitContext<M>) -> BoxFuture<'static, HookResult> + Send + Sync>;

/// Start hook. Receives the module handle and may suspend.
pub type StartHook<M> = Arc<dyn Fn(M) -> BoxFuture<'static, HookResult> + Send + Sync>;

/// Per-frame hook.
pub type FrameHook<M> = Arc<dyn Fn(&M, Tick) -> HookResult + Send + Sync>;

/// Lifecycle hooks a module declares.
pub struct Hooks<M> {
    init: Option<InitHook<M>>,
    start: Option<StartHook<M>>,
    frames: Vec<(TickPhase, FrameHook<M>)>,
}

impl<M> Default for Hooks<M> {
    fn default() -> Self {
        Self { init: None, start: None, frames: Vec::new() }
    }
}

impl<M> Hooks<M> {
    /// Set the init hook, replacing any previous one.
    pub fn set_init(&mut self, hook: InitHook<M>) {
        self.init = Some(hook);
    }

    /// Set the start hook, replacing any previous one.
    pub fn set_start(&mut self, hook: StartHook<M>) {
        self.start = Some(hook);
    }

    /// Set the callback of `phase`, replacing any previous one.
    pub fn set_frame(&mut self, phase: TickPhase, hook: FrameHook<M>) {
        match self.frames.iter_mut().find(|(p, _)| *p == phase) {
            Some(slot) => slot.1 = hook,
            None => self.frames.push((phase, hook)),
        }
    }

    /// Init hook, if declared.
    pub fn init(&self) -> Option<&InitHook<M>> {
        self.init.as_ref()
    }

    /// Start hook, if declared.
    pub fn start(&self) -> Option<&StartHook<M>> {
        self.start.as_ref()
    }

    /// Declared frame callbacks in declaration order.
    pub fn frames(&self) -> impl Iterator<Item = (TickPhase, &FrameHook<M>)> {
        self.frames.iter().map(|(phase, hook)| (*phase, hook))
    }

    /// Phases with a declared callback.
    pub fn phases(&self) -> Vec<TickPhase> {
        self.frames.iter().map(|(phase, _)| *phase).collect()
    }
}

impl<M> fmt::Debug for Hooks<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("init", &self.init.is_some())
            .field("start", &self.start.is_some())
            .field("frames", &self.phases())
            .finish()
    }
}

/// A registered unit of application logic: a service or a controller.
///
/// Implementors are cheap handles; clones share state.
pub trait Module: Clone + Send + Sync + 'static {
    /// Unique, non-empty name.
    fn name(&self) -> &str;

    /// Declared lifecycle hooks.
    fn hooks(&self) -> &Hooks<Self>;
}

/// What an init hook can see.
pub struct InitContext<M> {
    module: M,
    registry: Arc<Registry<M>>,
}

impl<M: Module> InitContext<M> {
    /// The module being initialized.
    pub fn module(&self) -> &M {
        &self.module
    }

    /// Another registered module. The registry is frozen while init hooks
    /// run, so every module that will ever exist is visible.
    pub fn sibling(&self, name: &str) -> Result<M, KnitError> {
        self.registry.frozen_get(name).ok_or_else(|| KnitError::NotFound { name: name.to_owned() })
    }
}

/// Why an init hook failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitFailureKind {
    /// Returned an error.
    Failed(String),
    /// Panicked.
    Panicked(String),
    /// Suspended while suspension was forbidden.
    Suspended,
}

/// One isolated init failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitFailure {
    /// Module whose init hook failed.
    pub module: String,
    /// Captured failure.
    pub kind: InitFailureKind,
}

impl InitFailure {
    /// The failure as a [`KnitError`].
    pub fn to_error(&self) -> KnitError {
        let module = self.module.clone();
        match &self.kind {
            InitFailureKind::Failed(reason) => KnitError::InitHook { module, reason: reason.clone() },
            InitFailureKind::Panicked(reason) => {
                KnitError::InitHook { module, reason: format!("panicked: {reason}") }
            },
            InitFailureKind::Suspended => KnitError::SuspensionViolation { module },
        }
    }
}

/// Outcome of the init phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Modules whose init hook completed, in registration order.
    pub completed: Vec<String>,
    /// Isolated failures, in registration order.
    pub failures: Vec<InitFailure>,
}

impl InitReport {
    /// True if every init hook completed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Registry, startup state machine, and frame queues of one side.
pub struct Lifecycle<M, E> {
    registry: Arc<Registry<M>>,
    env: E,
    phases: &'static [TickPhase],
    faults: FaultLog,
    latch: StartLatch,
    frames: OnceLock<BoundFrames>,
    report: OnceLock<InitReport>,
}

impl<M: Module, E: Environment> Lifecycle<M, E> {
    /// Orchestrator whose modules may declare callbacks for `phases`.
    pub fn new(env: E, phases: &'static [TickPhase]) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            env,
            phases,
            faults: FaultLog::new(),
            latch: StartLatch::new(),
            frames: OnceLock::new(),
            report: OnceLock::new(),
        }
    }

    /// Register a module.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` for a frame phase this side does not tick, plus
    /// everything [`Registry::register`] rejects.
    pub fn register(&self, module: M) -> Result<M, KnitError> {
        if let Some(phase) = module.hooks().phases().into_iter().find(|p| !self.phases.contains(p)) {
            return Err(KnitError::InvalidDefinition {
                reason: format!("{} declares a {phase} callback, which is not ticked here", module.name()),
            });
        }
        let module = self.registry.register(module)?;
        tracing::debug!(module = module.name(), "module registered");
        Ok(module)
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Registry<M> {
        &self.registry
    }

    /// Current startup state.
    pub fn state(&self) -> StartupState {
        self.registry.state()
    }

    /// True once startup completed.
    pub fn is_started(&self) -> bool {
        self.latch.is_released()
    }

    /// Run the startup pass.
    ///
    /// `bind` runs after the registry is frozen and before any init hook.
    ///
    /// # Errors
    ///
    /// - `AlreadyStarted` on a second call; the first pass is unaffected
    /// - whatever `bind` returns
    /// - `StartHook` if a start hook fails under inline dispatch
    /// - `FrameCallback` registration errors from the tick source
    ///
    /// Init failures never fail startup; they are returned in the report.
    pub async fn start<B>(
        &self,
        config: LifecycleConfig,
        ticks: &dyn TickSource,
        bind: B,
    ) -> Result<InitReport, KnitError>
    where
        B: FnOnce(&[M]) -> Result<(), KnitError> + Send,
    {
        let modules = self.registry.begin()?;
        tracing::info!(
            modules = modules.len(),
            dispatch = %config.dispatch,
            verify_init = config.verify_init,
            "startup begin"
        );

        bind(&modules)?;

        let report = self.run_init(&modules, config.verify_init).await;
        let _ = self.report.set(report.clone());

        let dispatcher = Dispatcher::new(config.dispatch, self.env.clone(), self.faults.clone());
        for module in &modules {
            if let Some(hook) = module.hooks().start() {
                let hook = Arc::clone(hook);
                let target = module.clone();
                dispatcher.dispatch_task(module.name(), FaultOrigin::Start, move || hook(target)).await?;
            }
        }

        let mut queues = FrameQueues::new();
        for module in &modules {
            for (phase, hook) in module.hooks().frames() {
                let hook = Arc::clone(hook);
                let target = module.clone();
                queues.push(phase, module.name(), Arc::new(move |tick: Tick| hook(&target, tick)));
            }
        }
        let bound = queues.bind(ticks, &dispatcher)?;
        let _ = self.frames.set(bound);

        self.registry.mark_started();
        self.latch.release();
        tracing::info!(
            completed = report.completed.len(),
            failed = report.failures.len(),
            "startup complete"
        );
        Ok(report)
    }

    async fn run_init(&self, modules: &[M], verify: bool) -> InitReport {
        let mut tasks = Vec::new();
        for module in modules {
            if let Some(hook) = module.hooks().init() {
                let hook = Arc::clone(hook);
                let ctx = InitContext { module: module.clone(), registry: Arc::clone(&self.registry) };
                let task = tokio::spawn(async move { guard_init(hook(ctx), verify).await });
                tasks.push((module.name().to_owned(), task));
            }
        }

        let mut report = InitReport::default();
        for (module, task) in tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Err(InitFailureKind::Panicked(panic_message(e.into_panic()))),
                Err(e) => Err(InitFailureKind::Failed(e.to_string())),
            };
            match outcome {
                Ok(()) => report.completed.push(module),
                Err(kind) => {
                    let failure = InitFailure { module, kind };
                    tracing::error!(module = %failure.module, "{}", failure.to_error());
                    report.failures.push(failure);
                },
            }
        }
        report
    }

    /// Future that resolves once startup completed. Never fails.
    pub fn on_start(&self) -> BoxFuture<'static, ()> {
        Box::pin(self.latch.wait())
    }

    /// Failures of spawned and deferred callbacks.
    pub fn faults(&self) -> &FaultLog {
        &self.faults
    }

    /// Callbacks bound to `phase`; zero before startup.
    pub fn queue_len(&self, phase: TickPhase) -> usize {
        self.frames.get().map_or(0, |frames| frames.len(phase))
    }

    /// Report of the init phase, once it ran.
    pub fn init_report(&self) -> Option<&InitReport> {
        self.report.get()
    }
}

async fn guard_init(
    mut init: BoxFuture<'static, HookResult>,
    verify: bool,
) -> Result<(), InitFailureKind> {
    let result = if verify { poll_once(&mut init).ok_or(InitFailureKind::Suspended)? } else { init.await };
    result.map_err(|e| InitFailureKind::Failed(e.to_string()))
}

fn poll_once(init: &mut BoxFuture<'static, HookResult>) -> Option<HookResult> {
    let mut cx = Context::from_waker(Waker::noop());
    match init.as_mut().poll(&mut cx) {
        Poll::Ready(result) => Some(result),
        Poll::Pending => None,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "opaque panic payload".to_string())
}
