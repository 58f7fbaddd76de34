//! Error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{frame::TickPhase, transport::PeerId};

/// Error type returned by module hooks and method handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of an init, start, or frame hook.
pub type HookResult = Result<(), BoxError>;

/// Errors from registry, binding, and lifecycle operations.
#[derive(Debug, Error)]
pub enum KnitError {
    /// Module definition is malformed (empty name, duplicate members, ...).
    #[error("invalid definition: {reason}")]
    InvalidDefinition {
        /// What is wrong with the definition.
        reason: String,
    },

    /// A module with this name is already registered.
    #[error("duplicate module name: {name}")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },

    /// Operation requires startup to have completed.
    #[error("knit has not been started")]
    NotStarted,

    /// Operation is only valid before startup begins.
    #[error("knit has already been started")]
    AlreadyStarted,

    /// No module with this name is registered.
    #[error("module not found: {name}")]
    NotFound {
        /// The requested name.
        name: String,
    },

    /// An init hook failed. Reported, never propagated out of startup.
    #[error("init hook of {module} failed: {reason}")]
    InitHook {
        /// Module whose init hook failed.
        module: String,
        /// Captured failure detail.
        reason: String,
    },

    /// A start hook failed under inline dispatch.
    #[error("start hook of {module} failed: {source}")]
    StartHook {
        /// Module whose start hook failed.
        module: String,
        /// Error returned by the hook.
        source: BoxError,
    },

    /// A frame callback failed under inline dispatch.
    #[error("{phase} callback of {module} failed: {source}")]
    FrameCallback {
        /// Module owning the callback.
        module: String,
        /// Tick phase the callback is bound to.
        phase: TickPhase,
        /// Error returned by the callback.
        source: BoxError,
    },

    /// An init hook suspended while suspension was forbidden.
    #[error("init hook of {module} suspended while suspension was forbidden")]
    SuspensionViolation {
        /// Module whose init hook suspended.
        module: String,
    },

    /// Start options failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What failed to validate.
        reason: String,
    },

    /// A remote service never published a surface.
    #[error("service {name} exposes no remote surface")]
    RemoteSurfaceMissing {
        /// The requested service.
        name: String,
    },

    /// A bound surface or proxy has no member of the requested kind.
    #[error("{module} has no {kind} member named {member}")]
    UnknownMember {
        /// Service name.
        module: String,
        /// Requested member name.
        member: String,
        /// Requested member kind.
        kind: &'static str,
    },

    /// Transport primitive failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Remote method call failed.
    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),

    /// A fan-out reached every target except these peers.
    #[error("{key} not delivered to peers {undelivered:?}")]
    PartialDelivery {
        /// Channel the fan-out went through.
        key: String,
        /// Peers that were gone, in target order.
        undelivered: Vec<PeerId>,
    },
}

impl KnitError {
    /// Returns true if this error signals misuse of the framework.
    ///
    /// Programmer errors fail fast at the call site. Everything else is an
    /// operational failure of a hook, a callback, or the transport.
    pub fn is_programmer_error(&self) -> bool {
        match self {
            Self::InvalidDefinition { .. }
            | Self::DuplicateName { .. }
            | Self::NotStarted
            | Self::AlreadyStarted
            | Self::NotFound { .. }
            | Self::InvalidConfig { .. }
            | Self::UnknownMember { .. }
            | Self::SuspensionViolation { .. } => true,

            Self::InitHook { .. }
            | Self::StartHook { .. }
            | Self::FrameCallback { .. }
            | Self::RemoteSurfaceMissing { .. }
            | Self::Transport(_)
            | Self::Remote(_)
            | Self::PartialDelivery { .. } => false,
        }
    }
}

/// Errors from transport primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// A primitive is already registered under this key.
    #[error("endpoint already bound: {0}")]
    AlreadyBound(String),

    /// The target peer is not connected.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// Payload failed to encode or decode.
    #[error("wire error: {0}")]
    Wire(String),
}

/// Failure of a remote method call, as observed by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RemoteError {
    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Handler(String),

    /// Nothing is served under the requested key.
    #[error("no such endpoint: {0}")]
    UnknownEndpoint(String),

    /// The serving module or the connection is gone.
    #[error("service unavailable")]
    Unavailable,

    /// Request or response payload could not be decoded.
    #[error("malformed payload: {0}")]
    Malformed(String),
}
