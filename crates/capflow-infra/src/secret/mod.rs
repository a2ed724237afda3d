//! Secret resolution for `is_secret` workflow variables.
//!
//! - `env` -- `EnvSecretResolver`: read-only lookup in process environment variables

pub mod env;

pub use env::EnvSecretResolver;
