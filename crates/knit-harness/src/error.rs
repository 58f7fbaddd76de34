//! Harness error types.

use std::path::PathBuf;

use knit_core::KnitError;
use thiserror::Error;

/// Errors from loading or running a scenario.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Scenario file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Framework operation failed.
    #[error(transparent)]
    Knit(#[from] KnitError),

    /// Scenario settings are out of range.
    #[error("invalid scenario: {0}")]
    Scenario(String),

    /// A frame callback failed under inline dispatch.
    #[error("frame {frame}: {source}")]
    Frame {
        /// Frame number, starting at 1.
        frame: u64,
        /// First callback error of that frame.
        source: KnitError,
    },
}
