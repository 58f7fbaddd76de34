//! Controller declarations and handles.

use std::{fmt, future::Future, sync::Arc};

use knit_core::{HookResult, Hooks, InitContext, Module, Tick, TickPhase};

/// Declaration of a controller, consumed by
/// [`crate::KnitClient::create_controller`].
pub struct ControllerDef {
    name: String,
    hooks: Hooks<Controller>,
}

impl ControllerDef {
    /// Empty declaration named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), hooks: Hooks::default() }
    }

    /// Run `hook` concurrently with every other init hook.
    #[must_use]
    pub fn on_init<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(InitContext<Controller>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hooks.set_init(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    /// Run `hook` after every init hook finished. The hook may suspend,
    /// e.g. on a remote call.
    #[must_use]
    pub fn on_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Controller) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hooks.set_start(Arc::new(move |module| Box::pin(hook(module))));
        self
    }

    /// Run `hook` on every tick of `phase`. All seven phases are ticked on
    /// the client.
    #[must_use]
    pub fn on_frame<F>(mut self, phase: TickPhase, hook: F) -> Self
    where
        F: Fn(&Controller, Tick) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.set_frame(phase, Arc::new(hook));
        self
    }

    /// Shorthand for `on_frame(TickPhase::RenderStepped, hook)`.
    #[must_use]
    pub fn on_render_stepped<F>(self, hook: F) -> Self
    where
        F: Fn(&Controller, Tick) -> HookResult + Send + Sync + 'static,
    {
        self.on_frame(TickPhase::RenderStepped, hook)
    }

    pub(crate) fn build(self) -> Controller {
        Controller { inner: Arc::new(ControllerInner { name: self.name, hooks: self.hooks }) }
    }
}

struct ControllerInner {
    name: String,
    hooks: Hooks<Controller>,
}

/// Handle to a registered controller. Clones share the same controller.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    /// Controller name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl Module for Controller {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn hooks(&self) -> &Hooks<Self> {
        &self.inner.hooks
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.inner.name)
            .field("hooks", &self.inner.hooks)
            .finish()
    }
}
