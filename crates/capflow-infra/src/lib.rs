//! Infrastructure layer for capflow.
//!
//! Contains implementations of the ports defined in `capflow-core`:
//! SQLite repositories, the filesystem blob store, live capsule services
//! (outbound HTTP and OpenAI-compatible completions), environment secrets,
//! webhook signature verification and `config.toml` loading.

pub mod config;
pub mod secret;
pub mod services;
pub mod sqlite;
pub mod storage;
pub mod webhook;
