//! Real-time tick source.

use std::time::Duration;

use crate::{
    env::Environment,
    error::KnitError,
    frame::{Tick, TickHandler, TickHub, TickPhase, TickSource},
};

/// Drives tick phases at a fixed interval using the environment's clock.
pub struct FrameTicker<E> {
    env: E,
    hub: TickHub,
    interval: Duration,
    phases: Vec<TickPhase>,
}

impl<E: Environment> FrameTicker<E> {
    /// Ticker firing `phases`, in order, once per `interval`.
    pub fn new(env: E, interval: Duration, phases: &[TickPhase]) -> Self {
        Self { env, hub: TickHub::new(), interval, phases: phases.to_vec() }
    }

    /// Tick until `frames` frames have run, or forever if `None`.
    ///
    /// Callback errors are logged and never stop the ticker.
    pub async fn run(&self, frames: Option<u64>) {
        let origin = self.env.now();
        let mut last = origin;
        let mut frame = 0u64;

        while frames.is_none_or(|limit| frame < limit) {
            self.env.sleep(self.interval).await;
            let now = self.env.now();
            let tick = Tick { time: now - origin, delta: now - last };
            last = now;

            for err in self.hub.fire_frame(&self.phases, tick) {
                tracing::warn!(frame, "frame callback failed: {err}");
            }
            frame += 1;
        }
    }
}

impl<E: Environment> TickSource for FrameTicker<E> {
    fn subscribe(&self, phase: TickPhase, handler: TickHandler) -> Result<(), KnitError> {
        if !self.phases.contains(&phase) {
            return Err(KnitError::InvalidDefinition {
                reason: format!("{phase} is not ticked by this frame ticker"),
            });
        }
        self.hub.subscribe(phase, handler)
    }
}
