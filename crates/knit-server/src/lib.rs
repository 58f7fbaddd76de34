//! Knit server.
//!
//! Hosts services: named modules whose declared client surface is bound to
//! remote endpoints at startup, and whose lifecycle hooks are driven by the
//! shared orchestrator in `knit-core`.
//!
//! ## Architecture
//!
//! ```text
//! knit-server
//!   ├─ KnitServer       (registry + startup for services)
//!   ├─ ServiceDef       (typed surface and hook declarations)
//!   ├─ EndpointBinder   (surface members -> channels, manifest publish)
//!   └─ Channels
//!        ├─ MethodChannel
//!        ├─ SignalChannel
//!        └─ PropertyChannel
//! ```
//!
//! Startup order: freeze, bind every service, init all concurrently, start
//! in registration order, bind frame queues, release `on_start` waiters.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod binder;
mod channel;
mod options;
mod service;

use std::sync::Arc;

pub use binder::{BoundMember, BoundSurface, EndpointBinder};
pub use channel::{MethodChannel, PropertyChannel, SignalChannel, SignalListener};
use knit_core::{
    BoxFuture, Environment, FaultLog, InitReport, KnitError, Lifecycle, ServerTransport, StartupState,
    SystemEnv, TickPhase, TickSource,
};
pub use options::ServerOptions;
pub use service::{MethodHandler, Service, ServiceDef};

struct ServerInner<E> {
    lifecycle: Lifecycle<Service, E>,
    transport: Arc<dyn ServerTransport>,
    ticks: Arc<dyn TickSource>,
}

/// Server-side Knit context. Clones share the same registry.
pub struct KnitServer<E = SystemEnv> {
    inner: Arc<ServerInner<E>>,
}

impl<E> Clone for KnitServer<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl KnitServer<SystemEnv> {
    /// Server on the tokio runtime.
    pub fn new(transport: Arc<dyn ServerTransport>, ticks: Arc<dyn TickSource>) -> Self {
        Self::with_env(SystemEnv::new(), transport, ticks)
    }
}

impl<E: Environment> KnitServer<E> {
    /// Server scheduling hooks through `env`.
    pub fn with_env(env: E, transport: Arc<dyn ServerTransport>, ticks: Arc<dyn TickSource>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                lifecycle: Lifecycle::new(env, &TickPhase::SERVER),
                transport,
                ticks,
            }),
        }
    }

    /// Register a service.
    ///
    /// # Errors
    ///
    /// - `InvalidDefinition` for an empty name, duplicate member names, or
    ///   a client-only frame phase
    /// - `DuplicateName` if the name is taken
    /// - `AlreadyStarted` once `start` was called
    pub fn create_service(&self, def: ServiceDef) -> Result<Service, KnitError> {
        self.inner.lifecycle.register(def.build()?)
    }

    /// Register several services, stopping at the first error.
    pub fn create_services(
        &self,
        defs: impl IntoIterator<Item = ServiceDef>,
    ) -> Result<Vec<Service>, KnitError> {
        defs.into_iter().map(|def| self.create_service(def)).collect()
    }

    /// Registered service. Only valid once started.
    pub fn get_service(&self, name: &str) -> Result<Service, KnitError> {
        self.inner.lifecycle.registry().lookup(name)
    }

    /// Every service in registration order. Only valid once started.
    pub fn services(&self) -> Result<Vec<Service>, KnitError> {
        self.inner.lifecycle.registry().all()
    }

    /// Bind, init, and start every registered service.
    ///
    /// Resolves once startup completed. Init failures are isolated and
    /// returned in the report; everything else fails the call.
    pub async fn start(&self, options: ServerOptions) -> Result<InitReport, KnitError> {
        let binder = EndpointBinder::new(&self.inner.transport, options.middleware.as_ref());
        self.inner
            .lifecycle
            .start(options.lifecycle(), self.inner.ticks.as_ref(), |services| {
                services.iter().try_for_each(|service| binder.bind(service))
            })
            .await
    }

    /// Resolves once startup completed; immediately if it already has.
    pub fn on_start(&self) -> BoxFuture<'static, ()> {
        self.inner.lifecycle.on_start()
    }

    /// Startup progress.
    pub fn state(&self) -> StartupState {
        self.inner.lifecycle.state()
    }

    /// True once startup completed.
    pub fn is_started(&self) -> bool {
        self.inner.lifecycle.is_started()
    }

    /// Failures of spawned and deferred start hooks and frame callbacks.
    pub fn faults(&self) -> &FaultLog {
        self.inner.lifecycle.faults()
    }

    /// Frame callbacks bound to `phase`.
    pub fn queue_len(&self, phase: TickPhase) -> usize {
        self.inner.lifecycle.queue_len(phase)
    }

    /// Report of the init phase, once it ran.
    pub fn init_report(&self) -> Option<&InitReport> {
        self.inner.lifecycle.init_report()
    }
}
