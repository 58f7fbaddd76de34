//! Simulated frame source.

use std::{sync::Arc, time::Duration};

use knit_core::{KnitError, Tick, TickHub, TickPhase};

use crate::SimEnv;

/// Steps whole frames on demand.
///
/// A step advances the [`SimEnv`] clock, fires the frame's phases in order,
/// then flushes whatever was deferred during the frame.
#[derive(Clone)]
pub struct SimFrames {
    env: SimEnv,
    hub: Arc<TickHub>,
    phases: &'static [TickPhase],
    frames: u64,
}

impl SimFrames {
    /// Frame source ticking `phases` in the given order.
    pub fn new(env: SimEnv, phases: &'static [TickPhase]) -> Self {
        Self { env, hub: Arc::new(TickHub::new()), phases, frames: 0 }
    }

    /// Frame source for a server (no render phases).
    pub fn server(env: SimEnv) -> Self {
        Self::new(env, &TickPhase::SERVER)
    }

    /// Frame source for a client (every phase).
    pub fn client(env: SimEnv) -> Self {
        Self::new(env, &TickPhase::ALL)
    }

    /// Hub to hand to a server or client as its tick source.
    pub fn hub(&self) -> Arc<TickHub> {
        Arc::clone(&self.hub)
    }

    /// Frames stepped so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Run one frame `delta` after the previous one.
    ///
    /// Returns the errors of inline callbacks; spawned and deferred
    /// failures go to the owner's fault log.
    pub fn step(&mut self, delta: Duration) -> Vec<KnitError> {
        self.env.advance(delta);
        self.frames += 1;
        let tick = Tick { time: self.env.elapsed(), delta };
        let errors = self.hub.fire_frame(self.phases, tick);
        let deferred = self.env.flush_deferred();
        tracing::trace!(frame = self.frames, deferred, errors = errors.len(), "frame stepped");
        errors
    }
}
