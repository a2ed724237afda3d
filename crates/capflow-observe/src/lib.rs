//! Observability setup for capflow.
//!
//! - `tracing_setup` -- global subscriber with `EnvFilter`, text or JSON
//!   output, and optional OpenTelemetry stdout export

pub mod tracing_setup;

pub use tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
