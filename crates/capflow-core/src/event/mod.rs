//! Live progress stream for executions.

pub mod bus;

pub use bus::EventBus;
