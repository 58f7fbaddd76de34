//! Middleware pipeline.
//!
//! An ordered list of interceptors applied to inbound arguments (before the
//! handler or listeners see them) and to outbound arguments (before they are
//! sent). Any interceptor may halt delivery; for method calls the halted
//! values become the response.
//!
//! ## Resolution
//!
//! Each module resolves its pipelines once, at bind time:
//! `module ?? global ?? empty`, independently for inbound and outbound. A
//! module that declares only inbound middleware still inherits the global
//! outbound list.

use std::{fmt, sync::Arc};

use crate::{
    transport::{ChannelKey, PeerId},
    wire::Args,
};

/// Outcome of one interceptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Hand the (possibly rewritten) arguments to the next stage.
    Continue,
    /// Stop delivery. For method calls these values are the response.
    Halt(Args),
}

/// What an interceptor knows about the message it sees.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Remote peer, or `None` on the client side.
    pub peer: Option<PeerId>,
    /// Channel the message travels on.
    pub key: &'a ChannelKey,
}

impl<'a> CallContext<'a> {
    /// Context for a message to or from `peer` on the server.
    pub fn server(peer: PeerId, key: &'a ChannelKey) -> Self {
        Self { peer: Some(peer), key }
    }

    /// Context for a message on the client.
    pub fn client(key: &'a ChannelKey) -> Self {
        Self { peer: None, key }
    }
}

/// A single interceptor.
pub type MiddlewareFn = Arc<dyn Fn(&CallContext<'_>, &mut Args) -> Flow + Send + Sync>;

/// Immutable, ordered interceptor list.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Arc<Vec<MiddlewareFn>>,
}

impl Pipeline {
    /// Build a pipeline from stages in execution order.
    pub fn new(stages: Vec<MiddlewareFn>) -> Self {
        Self { stages: Arc::new(stages) }
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True if the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order until one halts.
    pub fn run(&self, ctx: &CallContext<'_>, args: &mut Args) -> Flow {
        for stage in self.stages.iter() {
            if let Flow::Halt(values) = stage(ctx, args) {
                return Flow::Halt(values);
            }
        }
        Flow::Continue
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stages.len()).finish()
    }
}

/// Declared middleware. `None` means "not specified here, fall through".
#[derive(Clone, Default)]
pub struct MiddlewareSet {
    /// Interceptors for incoming arguments.
    pub inbound: Option<Vec<MiddlewareFn>>,
    /// Interceptors for outgoing arguments.
    pub outbound: Option<Vec<MiddlewareFn>>,
}

impl MiddlewareSet {
    /// Empty declaration; both directions fall through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an inbound interceptor.
    #[must_use]
    pub fn inbound<F>(mut self, stage: F) -> Self
    where
        F: Fn(&CallContext<'_>, &mut Args) -> Flow + Send + Sync + 'static,
    {
        self.inbound.get_or_insert_with(Vec::new).push(Arc::new(stage));
        self
    }

    /// Append an outbound interceptor.
    #[must_use]
    pub fn outbound<F>(mut self, stage: F) -> Self
    where
        F: Fn(&CallContext<'_>, &mut Args) -> Flow + Send + Sync + 'static,
    {
        self.outbound.get_or_insert_with(Vec::new).push(Arc::new(stage));
        self
    }

    /// Declare an explicitly empty inbound list, which still overrides a
    /// global inbound list.
    #[must_use]
    pub fn no_inbound(mut self) -> Self {
        self.inbound = Some(Vec::new());
        self
    }

    /// Declare an explicitly empty outbound list.
    #[must_use]
    pub fn no_outbound(mut self) -> Self {
        self.outbound = Some(Vec::new());
        self
    }
}

impl fmt::Debug for MiddlewareSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareSet")
            .field("inbound", &self.inbound.as_ref().map(Vec::len))
            .field("outbound", &self.outbound.as_ref().map(Vec::len))
            .finish()
    }
}

/// Pipelines a channel actually runs, fixed at bind time.
#[derive(Debug, Clone, Default)]
pub struct ResolvedMiddleware {
    /// Applied to incoming arguments.
    pub inbound: Pipeline,
    /// Applied to outgoing arguments.
    pub outbound: Pipeline,
}

impl ResolvedMiddleware {
    /// Resolve `module ?? global ?? empty` for each direction.
    pub fn resolve(module: Option<&MiddlewareSet>, global: Option<&MiddlewareSet>) -> Self {
        let inbound = module
            .and_then(|m| m.inbound.clone())
            .or_else(|| global.and_then(|g| g.inbound.clone()))
            .unwrap_or_default();
        let outbound = module
            .and_then(|m| m.outbound.clone())
            .or_else(|| global.and_then(|g| g.outbound.clone()))
            .unwrap_or_default();

        Self { inbound: Pipeline::new(inbound), outbound: Pipeline::new(outbound) }
    }
}
