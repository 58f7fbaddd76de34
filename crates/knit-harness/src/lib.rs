//! Deterministic simulation harness for Knit.
//!
//! Provides a virtual-clock [`SimEnv`], a frame stepper [`SimFrames`], and
//! a scripted scenario that runs a demo points service against any number
//! of clients over the in-memory loopback network.
//!
//! # Example
//!
//! ```rust,ignore
//! use knit_harness::{ScenarioConfig, scenario};
//!
//! let config = ScenarioConfig { frames: 10, loss: 0.2, seed: 7, ..Default::default() };
//! let report = scenario::run(&config).await?;
//! assert_eq!(report.server_total, 20);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod demo;
mod error;
pub mod scenario;
mod sim_env;
mod sim_frames;

pub use error::HarnessError;
pub use scenario::{ClientReport, ScenarioConfig, ScenarioReport};
pub use sim_env::SimEnv;
pub use sim_frames::SimFrames;
