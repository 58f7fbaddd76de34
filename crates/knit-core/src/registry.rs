//! Named module registry.
//!
//! # Invariants
//!
//! - Names are unique and non-empty
//! - Registration is only accepted while the state is `NotStarted`
//! - The state only moves forward: `NotStarted -> Starting -> Started`
//! - Once frozen the registry never changes

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::{error::KnitError, lifecycle::Module};

/// Startup progress of one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StartupState {
    /// Modules may be registered.
    NotStarted,
    /// Startup is running; the registry is frozen.
    Starting,
    /// Startup completed.
    Started,
}

struct Inner<M> {
    state: StartupState,
    frozen: bool,
    order: Vec<M>,
    index: HashMap<String, usize>,
}

/// Insertion-ordered map from module name to module handle.
pub struct Registry<M> {
    inner: RwLock<Inner<M>>,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: StartupState::NotStarted,
                frozen: false,
                order: Vec::new(),
                index: HashMap::new(),
            }),
        }
    }
}

impl<M: Module> Registry<M> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a module and hand back its handle.
    ///
    /// # Errors
    ///
    /// - `InvalidDefinition` if the name is empty
    /// - `AlreadyStarted` once the registry is frozen
    /// - `DuplicateName` if the name is taken
    pub fn register(&self, module: M) -> Result<M, KnitError> {
        let name = module.name().to_owned();
        if name.is_empty() {
            return Err(KnitError::InvalidDefinition { reason: "module name is empty".to_string() });
        }

        let mut inner = self.inner.write();
        if inner.frozen || inner.state != StartupState::NotStarted {
            return Err(KnitError::AlreadyStarted);
        }
        if inner.index.contains_key(&name) {
            return Err(KnitError::DuplicateName { name });
        }

        let position = inner.order.len();
        inner.order.push(module.clone());
        inner.index.insert(name, position);
        Ok(module)
    }

    /// Module registered under `name`.
    ///
    /// # Errors
    ///
    /// `NotStarted` before startup completed, `NotFound` if absent.
    pub fn lookup(&self, name: &str) -> Result<M, KnitError> {
        let inner = self.inner.read();
        if inner.state != StartupState::Started {
            return Err(KnitError::NotStarted);
        }
        inner
            .index
            .get(name)
            .map(|&i| inner.order[i].clone())
            .ok_or_else(|| KnitError::NotFound { name: name.to_owned() })
    }

    /// Every module in registration order.
    ///
    /// # Errors
    ///
    /// `NotStarted` before startup completed.
    pub fn all(&self) -> Result<Vec<M>, KnitError> {
        let inner = self.inner.read();
        if inner.state != StartupState::Started {
            return Err(KnitError::NotStarted);
        }
        Ok(inner.order.clone())
    }

    /// Make the registry immutable. Idempotent.
    pub fn freeze(&self) {
        let mut inner = self.inner.write();
        if !inner.frozen {
            inner.frozen = true;
            tracing::debug!(modules = inner.order.len(), "registry frozen");
        }
    }

    /// True once frozen.
    pub fn is_frozen(&self) -> bool {
        self.inner.read().frozen
    }

    /// Current startup state.
    pub fn state(&self) -> StartupState {
        self.inner.read().state
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }

    /// Move to `Starting`, freeze, and return the modules to start.
    pub(crate) fn begin(&self) -> Result<Vec<M>, KnitError> {
        let mut inner = self.inner.write();
        if inner.state != StartupState::NotStarted {
            return Err(KnitError::AlreadyStarted);
        }
        inner.state = StartupState::Starting;
        inner.frozen = true;
        Ok(inner.order.clone())
    }

    pub(crate) fn mark_started(&self) {
        self.inner.write().state = StartupState::Started;
    }

    /// Read access for startup code, valid once the registry is frozen.
    pub(crate) fn frozen_get(&self, name: &str) -> Option<M> {
        let inner = self.inner.read();
        if !inner.frozen {
            return None;
        }
        inner.index.get(name).map(|&i| inner.order[i].clone())
    }
}
