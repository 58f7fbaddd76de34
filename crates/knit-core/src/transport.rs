//! Transport seam.
//!
//! The core never touches sockets. It consumes these traits, keyed by
//! service name and member name, and layers middleware and channel semantics
//! on top of the primitives they hand out:
//!
//! - methods: request/response, served by the server, called by clients
//! - signals: fire-and-listen in both directions, reliable (ordered) or
//!   unreliable (best effort)
//! - manifests: the list of members a service exposes, so clients can build
//!   proxies without compile-time knowledge of the service

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    env::BoxFuture,
    error::{RemoteError, TransportError},
    surface::SurfaceManifest,
    wire::Args,
};

/// Identifies a connected remote client.
pub type PeerId = u64;

/// Address of one remote-facing primitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    /// Owning service.
    pub service: String,
    /// Member name inside the service's client surface.
    pub member: String,
}

impl ChannelKey {
    /// Build a key from service and member names.
    pub fn new(service: impl Into<String>, member: impl Into<String>) -> Self {
        Self { service: service.into(), member: member.into() }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.member)
    }
}

/// Delivery guarantee of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Delivery {
    /// Ordered, never dropped.
    Reliable,
    /// No ordering or delivery guarantee.
    Unreliable,
}

/// Server-side request handler installed with [`ServerTransport::serve`].
pub type RequestHandler =
    Arc<dyn Fn(PeerId, Args) -> BoxFuture<'static, Result<Args, RemoteError>> + Send + Sync>;

/// Server-side receiver of client-fired signals.
pub type PeerListener = Arc<dyn Fn(PeerId, Args) + Send + Sync>;

/// Client-side receiver of server-fired signals.
pub type Listener = Arc<dyn Fn(Args) + Send + Sync>;

/// Server half of the transport.
pub trait ServerTransport: Send + Sync + 'static {
    /// Serve request/response calls under `key`.
    fn serve(&self, key: ChannelKey, handler: RequestHandler) -> Result<(), TransportError>;

    /// Open the signal primitive for `key`.
    fn open_signal(
        &self,
        key: ChannelKey,
        delivery: Delivery,
    ) -> Result<Arc<dyn ServerSignal>, TransportError>;

    /// Make a service's manifest visible to clients.
    fn publish(&self, service: &str, manifest: SurfaceManifest) -> Result<(), TransportError>;

    /// Currently connected peers.
    fn peers(&self) -> Vec<PeerId>;
}

/// Server end of one signal.
pub trait ServerSignal: Send + Sync {
    /// Send `args` to one peer.
    fn send(&self, peer: PeerId, args: Args) -> Result<(), TransportError>;

    /// Install the receiver for messages fired by clients.
    fn on_receive(&self, listener: PeerListener);
}

/// Client half of the transport.
#[async_trait]
pub trait ClientTransport: Send + Sync + 'static {
    /// Fetch a service's manifest. `None` if it never published one.
    async fn manifest(&self, service: &str) -> Result<Option<SurfaceManifest>, TransportError>;

    /// Perform one request/response call.
    async fn request(&self, key: &ChannelKey, args: Args) -> Result<Args, RemoteError>;

    /// Open the signal primitive for `key`.
    fn open_signal(
        &self,
        key: ChannelKey,
        delivery: Delivery,
    ) -> Result<Arc<dyn ClientSignal>, TransportError>;
}

/// Client end of one signal.
pub trait ClientSignal: Send + Sync {
    /// Fire `args` to the server.
    fn send(&self, args: Args) -> Result<(), TransportError>;

    /// Install the receiver for messages fired by the server.
    fn on_receive(&self, listener: Listener);
}
