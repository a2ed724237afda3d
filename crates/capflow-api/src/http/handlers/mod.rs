//! HTTP request handlers for the REST API.

pub mod capsule;
pub mod execution;
pub mod share;
pub mod webhook;
pub mod workflow;
