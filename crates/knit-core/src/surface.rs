//! Declared client surface of a module.
//!
//! A surface is an ordered list of named members. Each member says what the
//! endpoint binder should build for it; plain values are carried along but
//! are never exposed remotely.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{error::KnitError, transport::Delivery, wire::Value};

/// One declared member. `H` is the side-specific method handler type.
pub enum Member<H> {
    /// Request/response endpoint served by `H`.
    Method(H),
    /// Fire-and-listen channel.
    Signal(Delivery),
    /// Replicated last-value cell seeded with the value.
    Property(Value),
    /// Plain data, not a remote endpoint.
    Value(Value),
}

impl<H> Member<H> {
    /// Remote kind of this member, `None` for plain values.
    pub fn kind(&self) -> Option<MemberKind> {
        match self {
            Self::Method(_) => Some(MemberKind::Method),
            Self::Signal(delivery) => Some(MemberKind::Signal(*delivery)),
            Self::Property(_) => Some(MemberKind::Property),
            Self::Value(_) => None,
        }
    }
}

/// Remote kind of a bound member, as published to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberKind {
    /// Request/response.
    Method,
    /// Fire-and-listen with the given delivery.
    Signal(Delivery),
    /// Replicated value.
    Property,
}

/// Ordered member declarations.
pub struct ClientSurface<H> {
    members: Vec<(String, Member<H>)>,
}

impl<H> Default for ClientSurface<H> {
    fn default() -> Self {
        Self { members: Vec::new() }
    }
}

impl<H> ClientSurface<H> {
    /// Empty surface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a member. Duplicates are reported by [`Self::validate`].
    pub fn insert(&mut self, name: impl Into<String>, member: Member<H>) {
        self.members.push((name.into(), member));
    }

    /// Members in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Member<H>)> {
        self.members.iter().map(|(name, member)| (name.as_str(), member))
    }

    /// Number of declared members, plain values included.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Reject empty or duplicate member names.
    pub fn validate(&self, module: &str) -> Result<(), KnitError> {
        let mut seen = HashSet::new();
        for (name, _) in &self.members {
            if name.is_empty() {
                return Err(KnitError::InvalidDefinition {
                    reason: format!("{module} declares a member with an empty name"),
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(KnitError::InvalidDefinition {
                    reason: format!("{module} declares member {name} twice"),
                });
            }
        }
        Ok(())
    }

    /// Remote members only, in declaration order.
    pub fn manifest(&self) -> SurfaceManifest {
        let entries = self
            .members
            .iter()
            .filter_map(|(name, member)| {
                member.kind().map(|kind| ManifestEntry { name: name.clone(), kind })
            })
            .collect();
        SurfaceManifest { entries }
    }
}

/// One published member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Member name.
    pub name: String,
    /// Remote kind.
    pub kind: MemberKind,
}

/// What a bound service exposes to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceManifest {
    /// Published members in declaration order.
    pub entries: Vec<ManifestEntry>,
}

impl SurfaceManifest {
    /// True if the service exposes nothing remotely.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Kind of a member, if published.
    pub fn kind_of(&self, name: &str) -> Option<MemberKind> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.kind)
    }
}
