//! Configuration loader for capflow.
//!
//! Reads `config.toml` from the data directory (`~/.capflow/` in production)
//! and deserializes it into [`CapflowConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use capflow_types::config::CapflowConfig;

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "CAPFLOW_DATA_DIR";

/// Resolve the data directory: `CAPFLOW_DATA_DIR`, else `~/.capflow`, else
/// `./.capflow`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".capflow");
    }

    PathBuf::from(".capflow")
}

/// Directory holding externally stored artifact blobs.
pub fn blob_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("blobs")
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`CapflowConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_config(data_dir: &Path) -> CapflowConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return CapflowConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return CapflowConfig::default();
        }
    };

    match toml::from_str::<CapflowConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            CapflowConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.max_concurrency, 4);
        assert_eq!(config.share.default_expiry_days, Some(7));
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[engine]
max_concurrency = 2
node_timeout_secs = 30

[share]
base_url = "https://flows.example.com"

[server]
port = 8080
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.max_concurrency, 2);
        assert_eq!(config.engine.node_timeout_secs, 30);
        assert_eq!(config.engine.global_max_concurrency, 16);
        assert_eq!(config.share.base_url, "https://flows.example.com");
        assert_eq!(config.server.port, 8080);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "[engine\nmax_concurrency = ")
            .await
            .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.max_concurrency, 4);
    }

    #[test]
    fn blob_dir_is_under_data_dir() {
        assert_eq!(
            blob_dir(Path::new("/srv/capflow")),
            PathBuf::from("/srv/capflow/blobs")
        );
    }
}
