//! Server channels.
//!
//! Each channel owns one transport primitive and the middleware pair
//! resolved for its service at bind time. Outbound middleware runs once per
//! target peer, so interceptors can tailor or suppress per-peer traffic.

use std::{collections::HashMap, fmt, sync::Arc};

use knit_core::{
    Args, CallContext, ChannelKey, Delivery, Flow, KnitError, ListenerId, Listeners, PeerId,
    RemoteError, RequestHandler, ResolvedMiddleware, ServerSignal, ServerTransport, Value,
};
use parking_lot::Mutex;

use crate::service::{MethodHandler, WeakService};

/// Request/response endpoint.
pub struct MethodChannel {
    key: ChannelKey,
    middleware: ResolvedMiddleware,
    handler: MethodHandler,
    owner: WeakService,
}

impl MethodChannel {
    pub(crate) fn new(
        key: ChannelKey,
        middleware: ResolvedMiddleware,
        handler: MethodHandler,
        owner: WeakService,
    ) -> Self {
        Self { key, middleware, handler, owner }
    }

    /// Transport address.
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Middleware this channel runs.
    pub fn middleware(&self) -> &ResolvedMiddleware {
        &self.middleware
    }

    /// Serve one call from `peer`.
    ///
    /// Inbound middleware may halt, in which case its values are the
    /// response and the handler never runs. Outbound middleware may replace
    /// the handler's response the same way.
    pub async fn handle(&self, peer: PeerId, mut args: Args) -> Result<Args, RemoteError> {
        if let Flow::Halt(values) = self.middleware.inbound.run(&CallContext::server(peer, &self.key), &mut args) {
            tracing::debug!(key = %self.key, peer, "call halted by inbound middleware");
            return Ok(values);
        }

        let service = self.owner.upgrade().ok_or(RemoteError::Unavailable)?;
        let mut response = (self.handler)(service, peer, args).await.map_err(|e| {
            tracing::warn!(key = %self.key, peer, "method handler failed: {e}");
            RemoteError::Handler(e.to_string())
        })?;

        match self.middleware.outbound.run(&CallContext::server(peer, &self.key), &mut response) {
            Flow::Halt(values) => Ok(values),
            Flow::Continue => Ok(response),
        }
    }

    pub(crate) fn request_handler(self: &Arc<Self>) -> RequestHandler {
        let channel = Arc::clone(self);
        Arc::new(move |peer, args| {
            let channel = Arc::clone(&channel);
            Box::pin(async move { channel.handle(peer, args).await })
        })
    }
}

impl fmt::Debug for MethodChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodChannel").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Receiver of client-fired signal messages.
pub type SignalListener = dyn Fn(PeerId, Args) + Send + Sync;

/// Fire-and-listen endpoint.
pub struct SignalChannel {
    key: ChannelKey,
    delivery: Delivery,
    middleware: ResolvedMiddleware,
    wire: Arc<dyn ServerSignal>,
    transport: Arc<dyn ServerTransport>,
    listeners: Arc<Listeners<SignalListener>>,
}

impl SignalChannel {
    pub(crate) fn open(
        key: ChannelKey,
        delivery: Delivery,
        middleware: ResolvedMiddleware,
        transport: Arc<dyn ServerTransport>,
    ) -> Result<Self, KnitError> {
        let wire = transport.open_signal(key.clone(), delivery)?;
        let listeners: Arc<Listeners<SignalListener>> = Arc::new(Listeners::new());

        let inbound = middleware.inbound.clone();
        let fan_out = Arc::clone(&listeners);
        let wire_key = key.clone();
        wire.on_receive(Arc::new(move |peer, mut args| {
            if let Flow::Halt(_) = inbound.run(&CallContext::server(peer, &wire_key), &mut args) {
                tracing::debug!(key = %wire_key, peer, "signal dropped by inbound middleware");
                return;
            }
            for listener in fan_out.snapshot() {
                listener(peer, args.clone());
            }
        }));

        Ok(Self { key, delivery, middleware, wire, transport, listeners })
    }

    /// Transport address.
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Delivery guarantee.
    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Middleware this channel runs.
    pub fn middleware(&self) -> &ResolvedMiddleware {
        &self.middleware
    }

    /// Listen to messages fired by clients.
    pub fn connect<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(PeerId, Args) + Send + Sync + 'static,
    {
        self.listeners.connect(Arc::new(listener))
    }

    /// Stop listening. Returns false if `id` was not connected.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        self.listeners.disconnect(id)
    }

    /// Number of connected listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Fire to one peer.
    pub fn fire(&self, peer: PeerId, mut args: Args) -> Result<(), KnitError> {
        if let Flow::Halt(_) = self.middleware.outbound.run(&CallContext::server(peer, &self.key), &mut args) {
            return Ok(());
        }
        self.wire.send(peer, args)?;
        Ok(())
    }

    /// Fire to every connected peer.
    pub fn fire_all(&self, args: &Args) -> Result<(), KnitError> {
        self.fire_filter(args, |_| true)
    }

    /// Fire to every connected peer except `excluded`.
    pub fn fire_except(&self, excluded: PeerId, args: &Args) -> Result<(), KnitError> {
        self.fire_filter(args, |peer| peer != excluded)
    }

    /// Fire to every connected peer accepted by `predicate`.
    pub fn fire_filter<P>(&self, args: &Args, predicate: P) -> Result<(), KnitError>
    where
        P: Fn(PeerId) -> bool,
    {
        let peers: Vec<PeerId> = self.transport.peers().into_iter().filter(|p| predicate(*p)).collect();
        self.fire_for(&peers, args)
    }

    /// Fire to each peer in `peers`.
    ///
    /// Every peer is attempted. Peers the transport no longer knows are
    /// reported together in `PartialDelivery` once the others were sent to.
    pub fn fire_for(&self, peers: &[PeerId], args: &Args) -> Result<(), KnitError> {
        let mut undelivered = Vec::new();
        for peer in peers {
            if let Err(e) = self.fire(*peer, args.clone()) {
                tracing::warn!(key = %self.key, peer, "signal not delivered: {e}");
                undelivered.push(*peer);
            }
        }
        delivery_result(&self.key, undelivered)
    }
}

impl fmt::Debug for SignalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalChannel")
            .field("key", &self.key)
            .field("delivery", &self.delivery)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

struct PropertyState {
    top: Value,
    overrides: HashMap<PeerId, Value>,
}

impl PropertyState {
    fn value_for(&self, peer: PeerId) -> Value {
        self.overrides.get(&peer).unwrap_or(&self.top).clone()
    }

    /// Forget overrides of peers that left.
    fn prune(&mut self, connected: &[PeerId]) {
        self.overrides.retain(|peer, _| connected.contains(peer));
    }
}

/// Replicated value with optional per-peer overrides.
///
/// Changes are pushed over a reliable signal; clients fetch the current
/// value with a request on the same key when they first observe it.
pub struct PropertyChannel {
    key: ChannelKey,
    middleware: ResolvedMiddleware,
    wire: Arc<dyn ServerSignal>,
    transport: Arc<dyn ServerTransport>,
    state: Mutex<PropertyState>,
}

impl PropertyChannel {
    pub(crate) fn open(
        key: ChannelKey,
        initial: Value,
        middleware: ResolvedMiddleware,
        transport: Arc<dyn ServerTransport>,
    ) -> Result<Arc<Self>, KnitError> {
        let wire = transport.open_signal(key.clone(), Delivery::Reliable)?;
        let channel = Arc::new(Self {
            key: key.clone(),
            middleware,
            wire,
            transport: Arc::clone(&transport),
            state: Mutex::new(PropertyState { top: initial, overrides: HashMap::new() }),
        });

        let weak = Arc::downgrade(&channel);
        transport.serve(
            key,
            Arc::new(move |peer, _args| {
                let fetched = weak.upgrade().map(|channel| channel.fetch(peer)).ok_or(RemoteError::Unavailable);
                Box::pin(async move { fetched })
            }),
        )?;
        Ok(channel)
    }

    /// Transport address.
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Top-level value.
    pub fn get(&self) -> Value {
        self.state.lock().top.clone()
    }

    /// Value `peer` sees: its override, or the top-level value.
    pub fn get_for(&self, peer: PeerId) -> Value {
        self.state.lock().value_for(peer)
    }

    /// Set the top-level value, drop every override, and push to all peers.
    pub fn set(&self, value: Value) -> Result<(), KnitError> {
        {
            let mut state = self.state.lock();
            state.top = value.clone();
            state.overrides.clear();
        }
        let targets = self.transport.peers().into_iter().map(|peer| (peer, value.clone()));
        self.push_each(targets, Vec::new())
    }

    /// Set the top-level value and push it to peers without an override.
    pub fn set_top(&self, value: Value) -> Result<(), KnitError> {
        let connected = self.transport.peers();
        let targets: Vec<PeerId> = {
            let mut state = self.state.lock();
            state.prune(&connected);
            state.top = value.clone();
            connected.into_iter().filter(|p| !state.overrides.contains_key(p)).collect()
        };
        self.push_each(targets.into_iter().map(|peer| (peer, value.clone())), Vec::new())
    }

    /// Override the value for one peer.
    pub fn set_for(&self, peer: PeerId, value: Value) -> Result<(), KnitError> {
        self.set_for_list(&[peer], value)
    }

    /// Override the value for each peer in `peers`.
    ///
    /// Only connected peers get an override. The rest are skipped and
    /// reported in `PartialDelivery` after every connected peer was pushed.
    pub fn set_for_list(&self, peers: &[PeerId], value: Value) -> Result<(), KnitError> {
        let connected = self.transport.peers();
        let (targets, departed): (Vec<PeerId>, Vec<PeerId>) = peers.iter().partition(|p| connected.contains(p));
        {
            let mut state = self.state.lock();
            state.prune(&connected);
            for peer in &targets {
                state.overrides.insert(*peer, value.clone());
            }
        }
        for peer in &departed {
            tracing::warn!(key = %self.key, peer, "override skipped for departed peer");
        }
        self.push_each(targets.into_iter().map(|peer| (peer, value.clone())), departed)
    }

    /// Override the value for every connected peer accepted by `predicate`.
    pub fn set_filter<P>(&self, predicate: P, value: Value) -> Result<(), KnitError>
    where
        P: Fn(PeerId) -> bool,
    {
        let peers: Vec<PeerId> = self.transport.peers().into_iter().filter(|p| predicate(*p)).collect();
        self.set_for_list(&peers, value)
    }

    /// Drop the override of one peer; it sees the top-level value again.
    pub fn clear_for(&self, peer: PeerId) -> Result<(), KnitError> {
        self.clear_for_list(&[peer])
    }

    /// Drop the overrides of each peer in `peers`.
    pub fn clear_for_list(&self, peers: &[PeerId]) -> Result<(), KnitError> {
        let connected = self.transport.peers();
        let (top, cleared) = {
            let mut state = self.state.lock();
            state.prune(&connected);
            let cleared: Vec<PeerId> =
                peers.iter().copied().filter(|peer| state.overrides.remove(peer).is_some()).collect();
            (state.top.clone(), cleared)
        };
        self.push_each(cleared.into_iter().map(|peer| (peer, top.clone())), Vec::new())
    }

    /// Drop the overrides of every connected peer accepted by `predicate`.
    pub fn clear_filter<P>(&self, predicate: P) -> Result<(), KnitError>
    where
        P: Fn(PeerId) -> bool,
    {
        let peers: Vec<PeerId> = self.transport.peers().into_iter().filter(|p| predicate(*p)).collect();
        self.clear_for_list(&peers)
    }

    /// Number of peers holding an override.
    pub fn override_count(&self) -> usize {
        self.state.lock().overrides.len()
    }

    fn fetch(&self, peer: PeerId) -> Args {
        let mut args = vec![self.get_for(peer)];
        match self.middleware.outbound.run(&CallContext::server(peer, &self.key), &mut args) {
            Flow::Halt(values) => values,
            Flow::Continue => args,
        }
    }

    fn push_each(
        &self,
        updates: impl IntoIterator<Item = (PeerId, Value)>,
        mut undelivered: Vec<PeerId>,
    ) -> Result<(), KnitError> {
        let mut lost = Vec::new();
        for (peer, value) in updates {
            let mut args = vec![value];
            if let Flow::Halt(_) = self.middleware.outbound.run(&CallContext::server(peer, &self.key), &mut args) {
                continue;
            }
            if let Err(e) = self.wire.send(peer, args) {
                tracing::warn!(key = %self.key, peer, "property update not delivered: {e}");
                lost.push(peer);
            }
        }
        if !lost.is_empty() {
            let mut state = self.state.lock();
            for peer in &lost {
                state.overrides.remove(peer);
            }
        }
        undelivered.extend(lost);
        delivery_result(&self.key, undelivered)
    }
}

impl fmt::Debug for PropertyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyChannel").field("key", &self.key).finish_non_exhaustive()
    }
}

fn delivery_result(key: &ChannelKey, undelivered: Vec<PeerId>) -> Result<(), KnitError> {
    if undelivered.is_empty() {
        Ok(())
    } else {
        Err(KnitError::PartialDelivery { key: key.to_string(), undelivered })
    }
}
