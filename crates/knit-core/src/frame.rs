//! Frame dispatch queues.
//!
//! The host engine ticks a handful of phases every frame. Modules declare
//! callbacks for any of them; at startup the orchestrator appends each
//! callback to the queue of its phase, in registration order, and binds
//! every non-empty queue to its tick event exactly once.
//!
//! # Invariants
//!
//! - A queue is created lazily, on its first callback
//! - Entries are appended only before binding; a bound queue is immutable
//! - Every tick runs every entry in order, unless an inline entry fails

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    dispatch::{Dispatcher, FaultOrigin},
    env::Environment,
    error::{HookResult, KnitError},
};

/// Engine tick phase a frame callback is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPhase {
    /// Before rendering, client only.
    RenderStepped,
    /// Before rendering, after input, client only.
    PreRender,
    /// Before animations step.
    PreAnimation,
    /// Before physics (legacy name).
    Stepped,
    /// Before physics.
    PreSimulation,
    /// After physics.
    PostSimulation,
    /// End of frame.
    Heartbeat,
}

impl TickPhase {
    /// Every phase, in the order the engine fires them within one frame.
    pub const ALL: [Self; 7] = [
        Self::RenderStepped,
        Self::PreRender,
        Self::PreAnimation,
        Self::Stepped,
        Self::PreSimulation,
        Self::PostSimulation,
        Self::Heartbeat,
    ];

    /// Phases available to server modules.
    pub const SERVER: [Self; 5] = [
        Self::PreAnimation,
        Self::Stepped,
        Self::PreSimulation,
        Self::PostSimulation,
        Self::Heartbeat,
    ];

    /// True for phases that only exist where something is rendered.
    pub fn is_client_only(self) -> bool {
        matches!(self, Self::RenderStepped | Self::PreRender)
    }

    /// Position in [`Self::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TickPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RenderStepped => "render_stepped",
            Self::PreRender => "pre_render",
            Self::PreAnimation => "pre_animation",
            Self::Stepped => "stepped",
            Self::PreSimulation => "pre_simulation",
            Self::PostSimulation => "post_simulation",
            Self::Heartbeat => "heartbeat",
        })
    }
}

/// Arguments of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tick {
    /// Time since the tick source started.
    pub time: Duration,
    /// Time since the previous frame.
    pub delta: Duration,
}

/// Subscriber of one tick phase.
pub type TickHandler = Arc<dyn Fn(Tick) -> Result<(), KnitError> + Send + Sync>;

/// Engine-side source of tick events.
pub trait TickSource: Send + Sync {
    /// Call `handler` on every tick of `phase`.
    fn subscribe(&self, phase: TickPhase, handler: TickHandler) -> Result<(), KnitError>;
}

/// In-process fan-out of tick events, shared by tick source implementations.
#[derive(Default)]
pub struct TickHub {
    handlers: RwLock<[Vec<TickHandler>; 7]>,
}

impl TickHub {
    /// Hub with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every subscriber of `phase` and collect their errors.
    ///
    /// Subscribers are snapshotted first, so a handler may subscribe more
    /// handlers without deadlocking; those run from the next tick on.
    pub fn fire(&self, phase: TickPhase, tick: Tick) -> Vec<KnitError> {
        let handlers = self.handlers.read()[phase.index()].clone();
        handlers.iter().filter_map(|handler| handler(tick).err()).collect()
    }

    /// Fire `phases` in order for one frame.
    pub fn fire_frame(&self, phases: &[TickPhase], tick: Tick) -> Vec<KnitError> {
        phases.iter().flat_map(|phase| self.fire(*phase, tick)).collect()
    }

    /// Number of subscribers of `phase`.
    pub fn subscriber_count(&self, phase: TickPhase) -> usize {
        self.handlers.read()[phase.index()].len()
    }
}

impl TickSource for TickHub {
    fn subscribe(&self, phase: TickPhase, handler: TickHandler) -> Result<(), KnitError> {
        self.handlers.write()[phase.index()].push(handler);
        Ok(())
    }
}

/// One frame callback, already bound to its module.
pub type FrameJob = Arc<dyn Fn(Tick) -> HookResult + Send + Sync>;

struct FrameEntry {
    module: String,
    job: FrameJob,
}

/// Ordered callbacks of one phase.
pub struct FrameQueue {
    phase: TickPhase,
    entries: Vec<FrameEntry>,
}

impl FrameQueue {
    fn new(phase: TickPhase) -> Self {
        Self { phase, entries: Vec::new() }
    }

    /// Phase this queue is bound to.
    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    /// Number of callbacks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the queue holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dispatch every callback in order.
    ///
    /// # Errors
    ///
    /// Under inline dispatch the first failing callback stops the queue for
    /// this tick and its error is returned.
    pub fn run<E: Environment>(&self, dispatcher: &Dispatcher<E>, tick: Tick) -> Result<(), KnitError> {
        for entry in &self.entries {
            let job = Arc::clone(&entry.job);
            dispatcher.dispatch(&entry.module, FaultOrigin::Frame(self.phase), move || job(tick))?;
        }
        Ok(())
    }
}

/// Queues being populated during startup.
#[derive(Default)]
pub struct FrameQueues {
    queues: [Option<FrameQueue>; 7],
}

impl FrameQueues {
    /// No queues yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback to the queue of `phase`, creating the queue on
    /// first use.
    pub fn push(&mut self, phase: TickPhase, module: impl Into<String>, job: FrameJob) {
        self.queues[phase.index()]
            .get_or_insert_with(|| FrameQueue::new(phase))
            .entries
            .push(FrameEntry { module: module.into(), job });
    }

    /// Number of callbacks queued for `phase`.
    pub fn len(&self, phase: TickPhase) -> usize {
        self.queues[phase.index()].as_ref().map_or(0, FrameQueue::len)
    }

    /// Subscribe every created queue to its tick event, once.
    pub fn bind<E: Environment>(
        self,
        source: &dyn TickSource,
        dispatcher: &Dispatcher<E>,
    ) -> Result<BoundFrames, KnitError> {
        let mut bound = Vec::new();
        for queue in self.queues.into_iter().flatten() {
            let queue = Arc::new(queue);
            let phase = queue.phase;
            let handler_queue = Arc::clone(&queue);
            let dispatcher = dispatcher.clone();
            source.subscribe(phase, Arc::new(move |tick: Tick| handler_queue.run(&dispatcher, tick)))?;
            tracing::debug!(%phase, callbacks = queue.len(), "frame queue bound");
            bound.push(queue);
        }
        Ok(BoundFrames { queues: bound })
    }
}

/// Queues after binding. Read-only.
#[derive(Default)]
pub struct BoundFrames {
    queues: Vec<Arc<FrameQueue>>,
}

impl BoundFrames {
    /// Number of callbacks bound to `phase`.
    pub fn len(&self, phase: TickPhase) -> usize {
        self.queues.iter().find(|q| q.phase == phase).map_or(0, |q| q.len())
    }

    /// Phases that have a bound queue, in frame order.
    pub fn phases(&self) -> Vec<TickPhase> {
        self.queues.iter().map(|q| q.phase).collect()
    }
}
