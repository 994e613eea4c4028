//! Nerve Core
//!
//! Shared plumbing for the aggregation engine and the resilience toolkit:
//! controllable time, injectable randomness, configuration errors and tracing setup.

pub mod config;
pub mod random;
pub mod telemetry;
pub mod time;

/// Re-export common types
pub use config::ConfigError;
pub use random::{RandomSource, ScriptedRandom, StdRandom};
pub use telemetry::{init_tracing, TelemetryError};
pub use time::{Clock, MockTimeProvider, RealTimeProvider, TimeProvider};
