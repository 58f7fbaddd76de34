//! Knit client.
//!
//! Hosts controllers (client-only modules with lifecycle hooks) and builds
//! proxies for remote services on first use.
//!
//! ## Architecture
//!
//! ```text
//! knit-client
//!   ├─ KnitClient       (registry + startup for controllers, proxy cache)
//!   ├─ ControllerDef    (hook declarations)
//!   └─ ServiceProxy     (built from a published manifest)
//!        ├─ RemoteMethod   (eager or lazy calls)
//!        ├─ RemoteSignal
//!        └─ RemoteProperty (fetched once, then kept current)
//! ```
//!
//! Controllers may declare callbacks for every tick phase, including the
//! render phases the server never ticks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod controller;
mod options;
mod proxy;

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

pub use controller::{Controller, ControllerDef};
use knit_core::{
    BoxFuture, ClientTransport, Environment, FaultLog, InitReport, KnitError, Lifecycle,
    ResolvedMiddleware, StartupState, SystemEnv, TickPhase, TickSource,
};
pub use options::ClientOptions;
pub use proxy::{
    PendingCall, PropertyObserver, ProxyMember, RemoteListener, RemoteMethod, RemoteProperty,
    RemoteSignal, ServiceProxy, Spawner,
};
use tokio::sync::Mutex;

struct ClientInner<E> {
    lifecycle: Lifecycle<Controller, E>,
    env: E,
    transport: Arc<dyn ClientTransport>,
    ticks: Arc<dyn TickSource>,
    options: OnceLock<ClientOptions>,
    proxies: Mutex<HashMap<String, ServiceProxy>>,
}

/// Client-side Knit context. Clones share the same registry and proxies.
pub struct KnitClient<E = SystemEnv> {
    inner: Arc<ClientInner<E>>,
}

impl<E> Clone for KnitClient<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl KnitClient<SystemEnv> {
    /// Client on the tokio runtime.
    pub fn new(transport: Arc<dyn ClientTransport>, ticks: Arc<dyn TickSource>) -> Self {
        Self::with_env(SystemEnv::new(), transport, ticks)
    }
}

impl<E: Environment> KnitClient<E> {
    /// Client scheduling hooks and eager calls through `env`.
    pub fn with_env(env: E, transport: Arc<dyn ClientTransport>, ticks: Arc<dyn TickSource>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                lifecycle: Lifecycle::new(env.clone(), &TickPhase::ALL),
                env,
                transport,
                ticks,
                options: OnceLock::new(),
                proxies: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a controller.
    ///
    /// # Errors
    ///
    /// - `InvalidDefinition` for an empty name
    /// - `DuplicateName` if the name is taken
    /// - `AlreadyStarted` once `start` was called
    pub fn create_controller(&self, def: ControllerDef) -> Result<Controller, KnitError> {
        self.inner.lifecycle.register(def.build())
    }

    /// Register several controllers, stopping at the first error.
    pub fn create_controllers(
        &self,
        defs: impl IntoIterator<Item = ControllerDef>,
    ) -> Result<Vec<Controller>, KnitError> {
        defs.into_iter().map(|def| self.create_controller(def)).collect()
    }

    /// Registered controller. Only valid once started.
    pub fn get_controller(&self, name: &str) -> Result<Controller, KnitError> {
        self.inner.lifecycle.registry().lookup(name)
    }

    /// Every controller in registration order. Only valid once started.
    pub fn controllers(&self) -> Result<Vec<Controller>, KnitError> {
        self.inner.lifecycle.registry().all()
    }

    /// Proxy for the remote service `name`, built on first request.
    ///
    /// Later requests for the same name return the cached proxy. Usable
    /// from the moment `start` was called, so init hooks may fetch proxies.
    ///
    /// # Errors
    ///
    /// - `NotStarted` before `start` was called
    /// - `RemoteSurfaceMissing` if the service never published a manifest
    /// - transport errors while opening channels or fetching properties
    pub async fn get_service(&self, name: &str) -> Result<ServiceProxy, KnitError> {
        let options = self.inner.options.get().ok_or(KnitError::NotStarted)?;

        let mut proxies = self.inner.proxies.lock().await;
        if let Some(proxy) = proxies.get(name) {
            return Ok(proxy.clone());
        }

        let manifest = self
            .inner
            .transport
            .manifest(name)
            .await?
            .ok_or_else(|| KnitError::RemoteSurfaceMissing { name: name.to_owned() })?;
        let middleware = ResolvedMiddleware::resolve(
            options.per_service_middleware.get(name),
            options.middleware.as_ref(),
        );

        let proxy = ServiceProxy::build(
            name,
            manifest,
            middleware,
            Arc::clone(&self.inner.transport),
            options.service_promises.then(|| self.spawner()),
        )
        .await?;
        tracing::debug!(service = name, members = proxy.members().count(), "service proxy built");
        proxies.insert(name.to_owned(), proxy.clone());
        Ok(proxy)
    }

    /// Init and start every registered controller.
    ///
    /// Resolves once startup completed. Init failures are isolated and
    /// returned in the report; everything else fails the call.
    pub async fn start(&self, options: ClientOptions) -> Result<InitReport, KnitError> {
        options.validate()?;
        let config = options.lifecycle();
        if self.inner.options.set(options).is_err() {
            return Err(KnitError::AlreadyStarted);
        }
        self.inner.lifecycle.start(config, self.inner.ticks.as_ref(), |_| Ok(())).await
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

    fn spawner(&self) -> Spawner {
        let env = self.inner.env.clone();
        Arc::new(move |task| env.spawn(task))
    }
}
