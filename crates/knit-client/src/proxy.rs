//! Remote service proxies.
//!
//! A proxy mirrors the members a service published in its manifest. On the
//! client, outbound middleware sees what is sent to the server (call
//! arguments, fired signals) and inbound middleware sees what comes back
//! (call results, server-fired signals, property values).

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use knit_core::{
    Args, BoxFuture, CallContext, ChannelKey, ClientSignal, ClientTransport, Delivery, Flow, KnitError,
    ListenerId, Listeners, MemberKind, RemoteError, ResolvedMiddleware, SurfaceManifest, Value,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Runs a task independently of the caller.
pub type Spawner = Arc<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>;

/// Result of a remote method call.
///
/// Eager calls are already in flight; lazy calls start on first poll.
pub struct PendingCall {
    state: PendingState,
}

enum PendingState {
    Eager(oneshot::Receiver<Result<Args, KnitError>>),
    Lazy(BoxFuture<'static, Result<Args, KnitError>>),
}

impl Future for PendingCall {
    type Output = Result<Args, KnitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            PendingState::Eager(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(KnitError::Remote(RemoteError::Unavailable)))),
            PendingState::Lazy(call) => call.as_mut().poll(cx),
        }
    }
}

/// Client end of a remote method.
#[derive(Clone)]
pub struct RemoteMethod {
    key: ChannelKey,
    middleware: ResolvedMiddleware,
    transport: Arc<dyn ClientTransport>,
    spawner: Option<Spawner>,
}

impl RemoteMethod {
    /// Call the method.
    ///
    /// With service promises enabled the request is sent right away and the
    /// returned handle only collects the result.
    pub fn call(&self, args: Args) -> PendingCall {
        let call = invoke(self.key.clone(), self.middleware.clone(), Arc::clone(&self.transport), args);
        match &self.spawner {
            Some(spawn) => {
                let (tx, rx) = oneshot::channel();
                spawn(Box::pin(async move {
                    let _ = tx.send(call.await);
                }));
                PendingCall { state: PendingState::Eager(rx) }
            },
            None => PendingCall { state: PendingState::Lazy(Box::pin(call)) },
        }
    }

    /// Transport address.
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }
}

async fn invoke(
    key: ChannelKey,
    middleware: ResolvedMiddleware,
    transport: Arc<dyn ClientTransport>,
    mut args: Args,
) -> Result<Args, KnitError> {
    if let Flow::Halt(values) = middleware.outbound.run(&CallContext::client(&key), &mut args) {
        return Ok(values);
    }
    let mut response = transport.request(&key, args).await?;
    match middleware.inbound.run(&CallContext::client(&key), &mut response) {
        Flow::Halt(values) => Ok(values),
        Flow::Continue => Ok(response),
    }
}

/// Receiver of server-fired signal messages.
pub type RemoteListener = dyn Fn(Args) + Send + Sync;

/// Client end of a remote signal.
#[derive(Clone)]
pub struct RemoteSignal {
    key: ChannelKey,
    delivery: Delivery,
    middleware: ResolvedMiddleware,
    wire: Arc<dyn ClientSignal>,
    listeners: Arc<Listeners<RemoteListener>>,
}

impl RemoteSignal {
    fn open(
        key: ChannelKey,
        delivery: Delivery,
        middleware: ResolvedMiddleware,
        transport: &dyn ClientTransport,
    ) -> Result<Self, KnitError> {
        let wire = transport.open_signal(key.clone(), delivery)?;
        let listeners: Arc<Listeners<RemoteListener>> = Arc::new(Listeners::new());

        let inbound = middleware.inbound.clone();
        let fan_out = Arc::clone(&listeners);
        let wire_key = key.clone();
        wire.on_receive(Arc::new(move |mut args: Args| {
            if let Flow::Halt(_) = inbound.run(&CallContext::client(&wire_key), &mut args) {
                return;
            }
            for listener in fan_out.snapshot() {
                listener(args.clone());
            }
        }));

        Ok(Self { key, delivery, middleware, wire, listeners })
    }

    /// Fire to the server.
    pub fn fire(&self, mut args: Args) -> Result<(), KnitError> {
        if let Flow::Halt(_) = self.middleware.outbound.run(&CallContext::client(&self.key), &mut args) {
            return Ok(());
        }
        self.wire.send(args)?;
        Ok(())
    }

    /// Listen to messages fired by the server.
    pub fn connect<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        self.listeners.connect(Arc::new(listener))
    }

    /// Stop listening. Returns false if `id` was not connected.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        self.listeners.disconnect(id)
    }

    /// Delivery guarantee.
    pub fn delivery(&self) -> Delivery {
        self.delivery
    }
}

/// Observer of property values.
pub type PropertyObserver = dyn Fn(&Value) + Send + Sync;

struct PropertyCell {
    value: Mutex<Option<Value>>,
    observers: Listeners<PropertyObserver>,
}

impl PropertyCell {
    fn store(&self, value: Value, only_if_empty: bool) {
        {
            let mut slot = self.value.lock();
            if only_if_empty && slot.is_some() {
                return;
            }
            *slot = Some(value.clone());
        }
        for observer in self.observers.snapshot() {
            observer(&value);
        }
    }
}

/// Client replica of a remote property.
#[derive(Clone)]
pub struct RemoteProperty {
    cell: Arc<PropertyCell>,
}

impl RemoteProperty {
    /// Subscribe to changes, then fetch the current value.
    ///
    /// A change pushed while the fetch is in flight wins over the fetched
    /// value.
    async fn open(
        key: ChannelKey,
        middleware: ResolvedMiddleware,
        transport: &dyn ClientTransport,
    ) -> Result<Self, KnitError> {
        let cell = Arc::new(PropertyCell { value: Mutex::new(None), observers: Listeners::new() });

        let wire = transport.open_signal(key.clone(), Delivery::Reliable)?;
        let pushed = Arc::clone(&cell);
        let inbound = middleware.inbound.clone();
        let wire_key = key.clone();
        wire.on_receive(Arc::new(move |mut args: Args| {
            if let Flow::Halt(_) = inbound.run(&CallContext::client(&wire_key), &mut args) {
                return;
            }
            pushed.store(first(args), false);
        }));

        let mut fetched = transport.request(&key, Vec::new()).await?;
        if let Flow::Continue = middleware.inbound.run(&CallContext::client(&key), &mut fetched) {
            cell.store(first(fetched), true);
        }
        Ok(Self { cell })
    }

    /// Current value, `None` until the first value arrived.
    pub fn get(&self) -> Option<Value> {
        self.cell.value.lock().clone()
    }

    /// True once a value arrived.
    pub fn is_ready(&self) -> bool {
        self.cell.value.lock().is_some()
    }

    /// Call `observer` with the current value now (if ready) and on every
    /// change.
    pub fn observe<F>(&self, observer: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let observer: Arc<PropertyObserver> = Arc::new(observer);
        if let Some(current) = self.get() {
            observer(&current);
        }
        self.cell.observers.connect(observer)
    }

    /// Call `observer` on every change, not with the current value.
    pub fn changed<F>(&self, observer: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.cell.observers.connect(Arc::new(observer))
    }

    /// Stop observing. Returns false if `id` was not connected.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        self.cell.observers.disconnect(id)
    }
}

fn first(args: Args) -> Value {
    args.into_iter().next().unwrap_or(Value::Null)
}

/// One member of a proxy.
#[derive(Clone)]
pub enum ProxyMember {
    /// Remote method.
    Method(RemoteMethod),
    /// Remote signal.
    Signal(RemoteSignal),
    /// Remote property.
    Property(RemoteProperty),
}

/// Client view of a remote service. Clones share the same proxy.
#[derive(Clone)]
pub struct ServiceProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    name: String,
    members: Vec<(String, ProxyMember)>,
}

impl ServiceProxy {
    /// Materialize every member listed in `manifest`.
    pub(crate) async fn build(
        name: &str,
        manifest: SurfaceManifest,
        middleware: ResolvedMiddleware,
        transport: Arc<dyn ClientTransport>,
        spawner: Option<Spawner>,
    ) -> Result<Self, KnitError> {
        let mut members = Vec::with_capacity(manifest.entries.len());
        for entry in manifest.entries {
            let key = ChannelKey::new(name, entry.name.as_str());
            let member = match entry.kind {
                MemberKind::Method => ProxyMember::Method(RemoteMethod {
                    key,
                    middleware: middleware.clone(),
                    transport: Arc::clone(&transport),
                    spawner: spawner.clone(),
                }),
                MemberKind::Signal(delivery) => ProxyMember::Signal(RemoteSignal::open(
                    key,
                    delivery,
                    middleware.clone(),
                    transport.as_ref(),
                )?),
                MemberKind::Property => ProxyMember::Property(
                    RemoteProperty::open(key, middleware.clone(), transport.as_ref()).await?,
                ),
            };
            members.push((entry.name, member));
        }
        Ok(Self { inner: Arc::new(ProxyInner { name: name.to_owned(), members }) })
    }

    /// Remote service name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Remote method `name`.
    pub fn method(&self, name: &str) -> Result<&RemoteMethod, KnitError> {
        match self.member(name) {
            Some(ProxyMember::Method(method)) => Ok(method),
            _ => Err(self.unknown(name, "method")),
        }
    }

    /// Remote signal `name`.
    pub fn signal(&self, name: &str) -> Result<&RemoteSignal, KnitError> {
        match self.member(name) {
            Some(ProxyMember::Signal(signal)) => Ok(signal),
            _ => Err(self.unknown(name, "signal")),
        }
    }

    /// Remote property `name`.
    pub fn property(&self, name: &str) -> Result<&RemoteProperty, KnitError> {
        match self.member(name) {
            Some(ProxyMember::Property(property)) => Ok(property),
            _ => Err(self.unknown(name, "property")),
        }
    }

    /// Member names in published order.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.inner.members.iter().map(|(name, _)| name.as_str())
    }

    /// True if both handles refer to the same proxy.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn member(&self, name: &str) -> Option<&ProxyMember> {
        self.inner.members.iter().find(|(member, _)| member == name).map(|(_, member)| member)
    }

    fn unknown(&self, member: &str, kind: &'static str) -> KnitError {
        KnitError::UnknownMember { module: self.inner.name.clone(), member: member.to_owned(), kind }
    }
}

impl fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("name", &self.inner.name)
            .field("members", &self.members().collect::<Vec<_>>())
            .finish()
    }
}
