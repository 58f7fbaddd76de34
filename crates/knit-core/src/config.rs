//! Startup configuration shared by both sides.
//!
//! Option structs are plain Rust values with documented defaults. They can
//! also be read from TOML; unknown keys and unknown enum values are rejected
//! rather than silently ignored.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{dispatch::DispatchMode, error::KnitError};

/// Settings the lifecycle orchestrator itself consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleConfig {
    /// How start hooks and frame callbacks are invoked.
    pub dispatch: DispatchMode,
    /// Treat an init hook that suspends as a contract violation.
    pub verify_init: bool,
}

/// Parse options from TOML, filling unspecified fields from defaults.
///
/// # Errors
///
/// `InvalidConfig` on malformed input, unknown keys, or unknown values.
pub fn from_toml<T: DeserializeOwned>(text: &str) -> Result<T, KnitError> {
    toml::from_str(text).map_err(|e| KnitError::InvalidConfig { reason: e.message().to_owned() })
}
