//! Helper types used by the server entrypoint:
//!
//! - [`sig_down`] - graceful shutdown signal handling
//! - [`telemetry`] - tracing/OpenTelemetry setup

pub mod sig_down;
pub mod telemetry;

pub use sig_down::SigDown;
pub use telemetry::Telemetry;
