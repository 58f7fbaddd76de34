//! In-memory transport.
//!
//! Connects one server and any number of clients inside a single process.
//! Every payload goes through the CBOR wire codec, so anything that would
//! not survive a real network does not survive here either. Unreliable
//! signals can be made lossy with a seeded RNG for reproducible tests.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    error::{RemoteError, TransportError},
    surface::SurfaceManifest,
    transport::{
        ChannelKey, ClientSignal, ClientTransport, Delivery, Listener, PeerId, PeerListener,
        RequestHandler, ServerSignal, ServerTransport,
    },
    wire::{self, Args},
};

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    /// Signal messages handed to a listener.
    pub delivered: u64,
    /// Unreliable messages dropped by the loss model.
    pub dropped: u64,
}

struct LossModel {
    rate: f64,
    rng: ChaCha8Rng,
}

struct Wire {
    delivery: Delivery,
    server_listener: Mutex<Option<PeerListener>>,
    client_listeners: Mutex<HashMap<PeerId, Listener>>,
}

#[derive(Default)]
struct State {
    peers: Vec<PeerId>,
    methods: HashMap<ChannelKey, RequestHandler>,
    manifests: HashMap<String, bytes::Bytes>,
    wires: HashMap<ChannelKey, Arc<Wire>>,
}

#[derive(Default)]
struct Shared {
    next_peer: AtomicU64,
    state: Mutex<State>,
    loss: Mutex<Option<LossModel>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn wire(&self, key: ChannelKey, delivery: Delivery) -> Arc<Wire> {
        let mut state = self.state.lock();
        Arc::clone(state.wires.entry(key).or_insert_with(|| {
            Arc::new(Wire {
                delivery,
                server_listener: Mutex::new(None),
                client_listeners: Mutex::new(HashMap::new()),
            })
        }))
    }

    /// True if an unreliable message should be dropped.
    fn lose(&self, delivery: Delivery) -> bool {
        if delivery == Delivery::Reliable {
            return false;
        }
        let lost = self.loss.lock().as_mut().is_some_and(|model| model.rng.gen_bool(model.rate));
        if lost {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        lost
    }

    fn is_connected(&self, peer: PeerId) -> bool {
        self.state.lock().peers.contains(&peer)
    }
}

/// Process-local network. Acts as the server transport; [`Self::connect`]
/// hands out client transports.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    shared: Arc<Shared>,
}

impl LoopbackNetwork {
    /// Lossless network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Network dropping unreliable messages with probability `rate`
    /// (clamped to `0.0..=1.0`, NaN meaning none), reproducibly for a given
    /// `seed`.
    pub fn with_unreliable_loss(rate: f64, seed: u64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        let network = Self::new();
        *network.shared.loss.lock() = Some(LossModel { rate, rng: ChaCha8Rng::seed_from_u64(seed) });
        network
    }

    /// Connect a new client.
    pub fn connect(&self) -> LoopbackClient {
        let peer = self.shared.next_peer.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.state.lock().peers.push(peer);
        tracing::debug!(peer, "loopback client connected");
        LoopbackClient { peer, shared: Arc::clone(&self.shared) }
    }

    /// Delivery counters so far.
    pub fn stats(&self) -> LoopbackStats {
        LoopbackStats {
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }
}

impl ServerTransport for LoopbackNetwork {
    fn serve(&self, key: ChannelKey, handler: RequestHandler) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        if state.methods.contains_key(&key) {
            return Err(TransportError::AlreadyBound(key.to_string()));
        }
        state.methods.insert(key, handler);
        Ok(())
    }

    fn open_signal(
        &self,
        key: ChannelKey,
        delivery: Delivery,
    ) -> Result<Arc<dyn ServerSignal>, TransportError> {
        let wire = self.shared.wire(key, delivery);
        Ok(Arc::new(LoopbackServerSignal { wire, shared: Arc::clone(&self.shared) }))
    }

    fn publish(&self, service: &str, manifest: SurfaceManifest) -> Result<(), TransportError> {
        let encoded = wire::encode(&manifest)?;
        let mut state = self.shared.state.lock();
        if state.manifests.contains_key(service) {
            return Err(TransportError::AlreadyBound(service.to_owned()));
        }
        state.manifests.insert(service.to_owned(), encoded);
        Ok(())
    }

    fn peers(&self) -> Vec<PeerId> {
        self.shared.state.lock().peers.clone()
    }
}

struct LoopbackServerSignal {
    wire: Arc<Wire>,
    shared: Arc<Shared>,
}

impl ServerSignal for LoopbackServerSignal {
    fn send(&self, peer: PeerId, args: Args) -> Result<(), TransportError> {
        if !self.shared.is_connected(peer) {
            return Err(TransportError::UnknownPeer(peer));
        }
        let encoded = wire::encode(&args)?;
        if self.shared.lose(self.wire.delivery) {
            return Ok(());
        }
        let listener = self.wire.client_listeners.lock().get(&peer).cloned();
        if let Some(listener) = listener {
            listener(wire::decode(&encoded)?);
            self.shared.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn on_receive(&self, listener: PeerListener) {
        *self.wire.server_listener.lock() = Some(listener);
    }
}

/// One connected client.
#[derive(Clone)]
pub struct LoopbackClient {
    peer: PeerId,
    shared: Arc<Shared>,
}

impl LoopbackClient {
    /// Peer id the server sees for this client.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Leave the network. Later sends to this peer fail with `UnknownPeer`.
    pub fn disconnect(&self) {
        let mut state = self.shared.state.lock();
        state.peers.retain(|p| *p != self.peer);
        for wire in state.wires.values() {
            wire.client_listeners.lock().remove(&self.peer);
        }
    }
}

#[async_trait]
impl ClientTransport for LoopbackClient {
    async fn manifest(&self, service: &str) -> Result<Option<SurfaceManifest>, TransportError> {
        let encoded = self.shared.state.lock().manifests.get(service).cloned();
        encoded.map(|bytes| wire::decode(&bytes)).transpose()
    }

    async fn request(&self, key: &ChannelKey, args: Args) -> Result<Args, RemoteError> {
        if !self.shared.is_connected(self.peer) {
            return Err(RemoteError::Unavailable);
        }
        let handler = self
            .shared
            .state
            .lock()
            .methods
            .get(key)
            .cloned()
            .ok_or_else(|| RemoteError::UnknownEndpoint(key.to_string()))?;

        let request = roundtrip(&args)?;
        let response = handler(self.peer, request).await?;
        roundtrip(&response)
    }

    fn open_signal(
        &self,
        key: ChannelKey,
        delivery: Delivery,
    ) -> Result<Arc<dyn ClientSignal>, TransportError> {
        let wire = self.shared.wire(key, delivery);
        Ok(Arc::new(LoopbackClientSignal { peer: self.peer, wire, shared: Arc::clone(&self.shared) }))
    }
}

fn roundtrip(args: &Args) -> Result<Args, RemoteError> {
    let encoded = wire::encode(args).map_err(|e| RemoteError::Malformed(e.to_string()))?;
    wire::decode(&encoded).map_err(|e| RemoteError::Malformed(e.to_string()))
}

struct LoopbackClientSignal {
    peer: PeerId,
    wire: Arc<Wire>,
    shared: Arc<Shared>,
}

impl ClientSignal for LoopbackClientSignal {
    fn send(&self, args: Args) -> Result<(), TransportError> {
        if !self.shared.is_connected(self.peer) {
            return Err(TransportError::UnknownPeer(self.peer));
        }
        let encoded = wire::encode(&args)?;
        if self.shared.lose(self.wire.delivery) {
            return Ok(());
        }
        let listener = self.wire.server_listener.lock().clone();
        if let Some(listener) = listener {
            listener(self.peer, wire::decode(&encoded)?);
            self.shared.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn on_receive(&self, listener: Listener) {
        self.wire.client_listeners.lock().insert(self.peer, listener);
    }
}
