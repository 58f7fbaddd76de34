//! Knit core.
//!
//! Side-agnostic building blocks shared by the Knit server and client:
//! module registry, lifecycle orchestration, frame dispatch queues,
//! middleware, surface declarations, and the transport seam.
//!
//! ## Architecture
//!
//! ```text
//! knit-core
//!   ├─ Environment       (time, spawn, end-of-frame defer)
//!   ├─ Lifecycle         (registry + startup state machine)
//!   │    ├─ Registry     (unique names, frozen at start)
//!   │    ├─ Dispatcher   (inline / spawn / defer)
//!   │    ├─ FrameQueues  (per-phase ordered callbacks)
//!   │    └─ StartLatch   (one-shot "startup complete")
//!   ├─ Middleware        (inbound / outbound pipelines)
//!   ├─ ClientSurface     (typed member declarations)
//!   └─ Transport traits  (+ LoopbackNetwork for tests)
//! ```
//!
//! The core performs no I/O of its own. Time and scheduling come from the
//! [`Environment`], ticks from a [`TickSource`], and remote traffic from
//! [`ServerTransport`] / [`ClientTransport`] implementations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod frame;
pub mod latch;
pub mod lifecycle;
pub mod listeners;
pub mod loopback;
pub mod middleware;
pub mod registry;
pub mod surface;
pub mod system_env;
pub mod ticker;
pub mod transport;
pub mod wire;

pub use config::{LifecycleConfig, from_toml};
pub use dispatch::{DispatchMode, Dispatcher, Fault, FaultLog, FaultOrigin};
pub use env::{BoxFuture, DeferredJob, Environment};
pub use error::{BoxError, HookResult, KnitError, RemoteError, TransportError};
pub use frame::{Tick, TickHandler, TickHub, TickPhase, TickSource};
pub use latch::StartLatch;
pub use lifecycle::{
    FrameHook, Hooks, InitContext, InitFailure, InitFailureKind, InitHook, InitReport, Lifecycle,
    Module, StartHook,
};
pub use listeners::{ListenerId, Listeners};
pub use loopback::{LoopbackClient, LoopbackNetwork, LoopbackStats};
pub use middleware::{CallContext, Flow, MiddlewareFn, MiddlewareSet, Pipeline, ResolvedMiddleware};
pub use registry::{Registry, StartupState};
pub use surface::{ClientSurface, ManifestEntry, Member, MemberKind, SurfaceManifest};
pub use system_env::SystemEnv;
pub use ticker::FrameTicker;
pub use transport::{
    ChannelKey, ClientSignal, ClientTransport, Delivery, Listener, PeerId, PeerListener,
    RequestHandler, ServerSignal, ServerTransport,
};
pub use wire::{Args, Value};
