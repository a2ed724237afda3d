//! HTTP/REST API layer for capflow.
//!
//! Axum-based REST API at `/api/v1/` with an envelope response format,
//! plus the public share view (`/s/{token}`) and webhook receiver
//! (`/hooks/{*path}`).

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
