//! Service declarations and handles.

use std::{
    fmt,
    future::Future,
    sync::{Arc, OnceLock, Weak},
};

use knit_core::{
    Args, BoxError, BoxFuture, ClientSurface, Delivery, HookResult, Hooks, InitContext, KnitError,
    Member, MiddlewareSet, Module, PeerId, Tick, TickPhase, Value,
};

use crate::{
    binder::{BoundMember, BoundSurface},
    channel::{MethodChannel, PropertyChannel, SignalChannel},
};

/// Server-side method implementation.
pub type MethodHandler =
    Arc<dyn Fn(Service, PeerId, Args) -> BoxFuture<'static, Result<Args, BoxError>> + Send + Sync>;

/// Declaration of a service, consumed by [`crate::KnitServer::create_service`].
///
/// ```ignore
/// let def = ServiceDef::new("PointsService")
///     .method("GetPoints", |svc, peer, _args| Ok(vec![svc.property("Points")?.get_for(peer)]))
///     .signal("PointsChanged")
///     .property("Points", 0);
/// ```
pub struct ServiceDef {
    name: String,
    surface: ClientSurface<MethodHandler>,
    middleware: Option<MiddlewareSet>,
    hooks: Hooks<Service>,
}

impl ServiceDef {
    /// Empty declaration named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), surface: ClientSurface::new(), middleware: None, hooks: Hooks::default() }
    }

    /// Expose a synchronous method.
    #[must_use]
    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Service, PeerId, Args) -> Result<Args, BoxError> + Send + Sync + 'static,
    {
        let handler: MethodHandler = Arc::new(move |service, peer, args| {
            let result = handler(&service, peer, args);
            Box::pin(async move { result })
        });
        self.surface.insert(name, Member::Method(handler));
        self
    }

    /// Expose a method whose handler may suspend.
    #[must_use]
    pub fn async_method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Service, PeerId, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Args, BoxError>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |service, peer, args| Box::pin(handler(service, peer, args)));
        self.surface.insert(name, Member::Method(handler));
        self
    }

    /// Expose a reliable, ordered signal.
    #[must_use]
    pub fn signal(mut self, name: impl Into<String>) -> Self {
        self.surface.insert(name, Member::Signal(Delivery::Reliable));
        self
    }

    /// Expose a best-effort signal.
    #[must_use]
    pub fn unreliable_signal(mut self, name: impl Into<String>) -> Self {
        self.surface.insert(name, Member::Signal(Delivery::Unreliable));
        self
    }

    /// Expose a replicated property seeded with `initial`.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, initial: impl Into<Value>) -> Self {
        self.surface.insert(name, Member::Property(initial.into()));
        self
    }

    /// Attach plain data to the surface. Not exposed remotely.
    #[must_use]
    pub fn value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.surface.insert(name, Member::Value(value.into()));
        self
    }

    /// Override the global middleware for this service.
    #[must_use]
    pub fn middleware(mut self, middleware: MiddlewareSet) -> Self {
        self.middleware = Some(middleware);
        self
    }

    /// Run `hook` concurrently with every other init hook.
    #[must_use]
    pub fn on_init<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(InitContext<Service>) -> Fut + Send + Sync + 'static,
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
        F: Fn(Service) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hooks.set_start(Arc::new(move |module| Box::pin(hook(module))));
        self
    }

    /// Run `hook` on every tick of `phase`.
    #[must_use]
    pub fn on_frame<F>(mut self, phase: TickPhase, hook: F) -> Self
    where
        F: Fn(&Service, Tick) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.set_frame(phase, Arc::new(hook));
        self
    }

    /// Shorthand for `on_frame(TickPhase::Heartbeat, hook)`.
    #[must_use]
    pub fn on_heartbeat<F>(self, hook: F) -> Self
    where
        F: Fn(&Service, Tick) -> HookResult + Send + Sync + 'static,
    {
        self.on_frame(TickPhase::Heartbeat, hook)
    }

    pub(crate) fn build(self) -> Result<Service, KnitError> {
        self.surface.validate(&self.name)?;
        Ok(Service {
            inner: Arc::new(ServiceInner {
                name: self.name,
                surface: self.surface,
                middleware: self.middleware,
                hooks: self.hooks,
                bound: OnceLock::new(),
            }),
        })
    }
}

struct ServiceInner {
    name: String,
    surface: ClientSurface<MethodHandler>,
    middleware: Option<MiddlewareSet>,
    hooks: Hooks<Service>,
    bound: OnceLock<BoundSurface>,
}

/// Handle to a registered service. Clones share the same service.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    /// Service name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Bound client surface; `None` until startup bound it.
    pub fn client(&self) -> Option<&BoundSurface> {
        self.inner.bound.get()
    }

    /// Bound method channel.
    pub fn method(&self, name: &str) -> Result<&Arc<MethodChannel>, KnitError> {
        match self.member(name, "method")? {
            BoundMember::Method(channel) => Ok(channel),
            _ => Err(self.unknown(name, "method")),
        }
    }

    /// Bound signal channel.
    pub fn signal(&self, name: &str) -> Result<&Arc<SignalChannel>, KnitError> {
        match self.member(name, "signal")? {
            BoundMember::Signal(channel) => Ok(channel),
            _ => Err(self.unknown(name, "signal")),
        }
    }

    /// Bound property channel.
    pub fn property(&self, name: &str) -> Result<&Arc<PropertyChannel>, KnitError> {
        match self.member(name, "property")? {
            BoundMember::Property(channel) => Ok(channel),
            _ => Err(self.unknown(name, "property")),
        }
    }

    /// Plain value declared on the surface. Readable before binding.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.inner.surface.iter().find_map(|(member, declared)| match declared {
            Member::Value(value) if member == name => Some(value),
            _ => None,
        })
    }

    fn member(&self, name: &str, kind: &'static str) -> Result<&BoundMember, KnitError> {
        let bound = self.inner.bound.get().ok_or(KnitError::NotStarted)?;
        bound.get(name).ok_or_else(|| self.unknown(name, kind))
    }

    fn unknown(&self, member: &str, kind: &'static str) -> KnitError {
        KnitError::UnknownMember { module: self.inner.name.clone(), member: member.to_owned(), kind }
    }

    pub(crate) fn surface(&self) -> &ClientSurface<MethodHandler> {
        &self.inner.surface
    }

    pub(crate) fn middleware(&self) -> Option<&MiddlewareSet> {
        self.inner.middleware.as_ref()
    }

    pub(crate) fn downgrade(&self) -> WeakService {
        WeakService(Arc::downgrade(&self.inner))
    }

    /// Store the bound surface. Returns false if already bound.
    pub(crate) fn attach(&self, bound: BoundSurface) -> bool {
        self.inner.bound.set(bound).is_ok()
    }
}

impl Module for Service {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn hooks(&self) -> &Hooks<Self> {
        &self.inner.hooks
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.inner.name)
            .field("members", &self.inner.surface.len())
            .field("bound", &self.inner.bound.get().is_some())
            .finish()
    }
}

/// Non-owning service handle held by its own channels.
#[derive(Clone)]
pub(crate) struct WeakService(Weak<ServiceInner>);

impl WeakService {
    pub(crate) fn upgrade(&self) -> Option<Service> {
        self.0.upgrade().map(|inner| Service { inner })
    }
}
