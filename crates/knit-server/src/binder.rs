//! Server-side endpoint binder.
//!
//! Turns each declared surface member into a live channel:
//!
//! | Member                    | Result                          |
//! |---------------------------|---------------------------------|
//! | `Method(handler)`         | [`MethodChannel`]               |
//! | `Signal(Reliable)`        | reliable [`SignalChannel`]      |
//! | `Signal(Unreliable)`      | best-effort [`SignalChannel`]   |
//! | `Property(initial)`       | [`PropertyChannel`] at `initial`|
//! | `Value(v)`                | kept as plain data              |
//!
//! Every channel of a service shares one middleware pair, resolved here
//! once as `service ?? global ?? empty` per direction.

use std::sync::Arc;

use knit_core::{
    ChannelKey, KnitError, Member, MiddlewareSet, ResolvedMiddleware, ServerTransport, Value,
};

use crate::{
    channel::{MethodChannel, PropertyChannel, SignalChannel},
    service::Service,
};

/// One member after binding.
#[derive(Debug)]
pub enum BoundMember {
    /// Request/response endpoint.
    Method(Arc<MethodChannel>),
    /// Fire-and-listen endpoint.
    Signal(Arc<SignalChannel>),
    /// Replicated value.
    Property(Arc<PropertyChannel>),
    /// Plain data, untouched.
    Value(Value),
}

/// A service's surface after binding, in declaration order.
#[derive(Debug, Default)]
pub struct BoundSurface {
    members: Vec<(String, BoundMember)>,
}

impl BoundSurface {
    /// Member named `name`.
    pub fn get(&self, name: &str) -> Option<&BoundMember> {
        self.members.iter().find(|(member, _)| member == name).map(|(_, bound)| bound)
    }

    /// Members in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BoundMember)> {
        self.members.iter().map(|(name, bound)| (name.as_str(), bound))
    }

    /// Number of members, plain values included.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Binds services against one transport and one global middleware set.
pub struct EndpointBinder<'a> {
    transport: &'a Arc<dyn ServerTransport>,
    global: Option<&'a MiddlewareSet>,
}

impl<'a> EndpointBinder<'a> {
    /// Binder publishing through `transport`.
    pub fn new(transport: &'a Arc<dyn ServerTransport>, global: Option<&'a MiddlewareSet>) -> Self {
        Self { transport, global }
    }

    /// Bind every member of `service` and publish its manifest.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` if the service was already bound, or the
    /// transport's error if a primitive cannot be opened.
    pub fn bind(&self, service: &Service) -> Result<(), KnitError> {
        if service.client().is_some() {
            return Err(KnitError::AlreadyStarted);
        }

        let middleware = ResolvedMiddleware::resolve(service.middleware(), self.global);
        let mut members = Vec::with_capacity(service.surface().len());

        for (name, member) in service.surface().iter() {
            let key = ChannelKey::new(service.name(), name);
            let bound = match member {
                Member::Method(handler) => {
                    let channel = Arc::new(MethodChannel::new(
                        key.clone(),
                        middleware.clone(),
                        Arc::clone(handler),
                        service.downgrade(),
                    ));
                    self.transport.serve(key, channel.request_handler())?;
                    BoundMember::Method(channel)
                },
                Member::Signal(delivery) => BoundMember::Signal(Arc::new(SignalChannel::open(
                    key,
                    *delivery,
                    middleware.clone(),
                    Arc::clone(self.transport),
                )?)),
                Member::Property(initial) => BoundMember::Property(PropertyChannel::open(
                    key,
                    initial.clone(),
                    middleware.clone(),
                    Arc::clone(self.transport),
                )?),
                Member::Value(value) => BoundMember::Value(value.clone()),
            };
            members.push((name.to_owned(), bound));
        }

        let manifest = service.surface().manifest();
        if manifest.is_empty() {
            tracing::debug!(service = service.name(), "no remote surface, nothing published");
        } else {
            tracing::debug!(service = service.name(), members = manifest.entries.len(), "surface published");
            self.transport.publish(service.name(), manifest)?;
        }

        service.attach(BoundSurface { members });
        Ok(())
    }
}
