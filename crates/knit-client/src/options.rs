//! Client start options.

use std::collections::HashMap;

use knit_core::{DispatchMode, KnitError, LifecycleConfig, MiddlewareSet};
use serde::Deserialize;

/// Options for [`crate::KnitClient::start`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientOptions {
    /// Middleware for every service proxy without its own entry.
    #[serde(skip)]
    pub middleware: Option<MiddlewareSet>,
    /// Middleware overrides keyed by exact service name.
    #[serde(skip)]
    pub per_service_middleware: HashMap<String, MiddlewareSet>,
    /// How start hooks and frame callbacks are invoked.
    pub dispatch: DispatchMode,
    /// Treat an init hook that suspends as a contract violation.
    pub verify_init: bool,
    /// Start remote method calls eagerly and hand back a pending result.
    /// When false, a call runs inside the task that awaits it.
    pub service_promises: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            middleware: None,
            per_service_middleware: HashMap::new(),
            dispatch: DispatchMode::default(),
            verify_init: false,
            service_promises: true,
        }
    }
}

impl ClientOptions {
    /// Parse options from TOML. Middleware is set in code.
    pub fn from_toml(text: &str) -> Result<Self, KnitError> {
        knit_core::from_toml(text)
    }

    /// Set the global middleware.
    #[must_use]
    pub fn with_middleware(mut self, middleware: MiddlewareSet) -> Self {
        self.middleware = Some(middleware);
        self
    }

    /// Override middleware for the proxy of `service`.
    #[must_use]
    pub fn with_service_middleware(mut self, service: impl Into<String>, middleware: MiddlewareSet) -> Self {
        self.per_service_middleware.insert(service.into(), middleware);
        self
    }

    /// Set the dispatch mode.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Choose eager (`true`) or lazy (`false`) remote calls.
    #[must_use]
    pub fn with_service_promises(mut self, enabled: bool) -> Self {
        self.service_promises = enabled;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), KnitError> {
        if self.per_service_middleware.keys().any(String::is_empty) {
            return Err(KnitError::InvalidConfig {
                reason: "per-service middleware keyed by an empty service name".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig { dispatch: self.dispatch, verify_init: self.verify_init }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promises_default_on() {
        let options = ClientOptions::from_toml("dispatch = \"inline\"").unwrap();

        assert!(options.service_promises);
        assert_eq!(options.dispatch, DispatchMode::Inline);
    }

    #[test]
    fn empty_service_key_is_invalid() {
        let options = ClientOptions::default().with_service_middleware("", MiddlewareSet::new());
        assert!(matches!(options.validate(), Err(KnitError::InvalidConfig { .. })));
    }

    #[test]
    fn wrong_value_type_is_rejected() {
        let result = ClientOptions::from_toml("service_promises = \"yes\"");
        assert!(matches!(result, Err(KnitError::InvalidConfig { .. })));
    }
}
