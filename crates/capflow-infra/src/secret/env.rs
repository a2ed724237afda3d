//! Environment variable secret resolver.
//!
//! Key resolution for a secret named `name`:
//! - first `CAPFLOW_SECRET_{NAME}` (uppercased, `-` and `.` become `_`)
//! - then `name` itself as an environment variable

use capflow_core::engine::{SecretError, SecretFuture, SecretResolver};

/// Prefix for namespaced secret variables.
pub const SECRET_ENV_PREFIX: &str = "CAPFLOW_SECRET_";

/// Read-only secret resolver backed by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretResolver;

impl EnvSecretResolver {
    pub fn new() -> Self {
        Self
    }

    /// Environment variable names checked for `name`, in priority order.
    pub fn candidates(name: &str) -> [String; 2] {
        let namespaced: String = name
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        [format!("{SECRET_ENV_PREFIX}{namespaced}"), name.to_string()]
    }

    fn lookup(name: &str) -> Option<String> {
        Self::candidates(name).iter().find_map(|var| match std::env::var(var) {
            Ok(val) if !val.is_empty() => Some(val),
            // Missing, empty or not valid Unicode all count as absent.
            _ => None,
        })
    }
}

impl SecretResolver for EnvSecretResolver {
    fn resolve<'a>(&'a self, name: &'a str) -> SecretFuture<'a> {
        Box::pin(async move {
            Self::lookup(name).ok_or_else(|| {
                tracing::debug!(secret = name, "secret not present in environment");
                SecretError(format!("secret '{name}' is not set in the environment"))
            })
        })
    }
}
