//! Shared infrastructure for the flux collaboration layer.
//!
//! - `transport`: the message bus, wire frames, transports and correlated
//!   request/response handling
//! - `config`: connection settings from the environment or a config file
//! - `error`: the top-level error type
//! - `telemetry`: tracing subscriber setup (feature `telemetry`)

pub mod config;
pub mod error;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod transport;

pub use config::FluxConfig;
pub use error::{ConfigError, FluxError};
pub use smol_str::SmolStr;
