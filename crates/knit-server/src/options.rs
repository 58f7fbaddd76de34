//! Server start options.

use knit_core::{DispatchMode, KnitError, LifecycleConfig, MiddlewareSet};
use serde::Deserialize;

/// Options for [`crate::KnitServer::start`].
///
/// Unspecified fields keep their defaults: no middleware, spawn dispatch,
/// init suspension allowed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerOptions {
    /// Middleware for every service that does not declare its own.
    #[serde(skip)]
    pub middleware: Option<MiddlewareSet>,
    /// How start hooks and frame callbacks are invoked.
    pub dispatch: DispatchMode,
    /// Treat an init hook that suspends as a contract violation.
    pub verify_init: bool,
}

impl ServerOptions {
    /// Parse options from TOML. Middleware cannot be expressed in a file
    /// and is set with [`Self::with_middleware`].
    pub fn from_toml(text: &str) -> Result<Self, KnitError> {
        knit_core::from_toml(text)
    }

    /// Set the global middleware.
    #[must_use]
    pub fn with_middleware(mut self, middleware: MiddlewareSet) -> Self {
        self.middleware = Some(middleware);
        self
    }

    /// Set the dispatch mode.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub(crate) fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig { dispatch: self.dispatch, verify_init: self.verify_init }
    }
}
