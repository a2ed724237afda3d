//! Shared domain types for capflow.
//!
//! Workflows, artifacts, executions, capsule metadata, share links, progress
//! events, configuration and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod artifact;
pub mod capsule;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod share;
pub mod workflow;
