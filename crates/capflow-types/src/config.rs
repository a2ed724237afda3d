//! Configuration types for capflow.
//!
//! `CapflowConfig` represents the top-level `config.toml` that controls
//! engine concurrency, artifact storage, share link defaults, the LLM
//! backend used by capsules, and the HTTP server address.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.capflow/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapflowConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub artifacts: ArtifactSettings,
    #[serde(default)]
    pub share: ShareSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

/// Execution engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Concurrent nodes per execution (workflows may override).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Concurrent nodes across all executions.
    #[serde(default = "default_global_max_concurrency")]
    pub global_max_concurrency: usize,
    /// Timeout for a single node attempt.
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
    /// Capacity of the progress event broadcast channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_global_max_concurrency() -> usize {
    16
}

fn default_node_timeout_secs() -> u64 {
    300
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            global_max_concurrency: default_global_max_concurrency(),
            node_timeout_secs: default_node_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Artifact storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSettings {
    /// Payloads at or below this size are stored inline.
    #[serde(default = "default_inline_threshold_bytes")]
    pub inline_threshold_bytes: usize,
}

fn default_inline_threshold_bytes() -> usize {
    64 * 1024
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            inline_threshold_bytes: default_inline_threshold_bytes(),
        }
    }
}

/// Share link settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSettings {
    /// Prefix for generated share URLs.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Expiry applied when a request does not specify one (None = never).
    #[serde(default = "default_expiry_days")]
    pub default_expiry_days: Option<u32>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_expiry_days() -> Option<u32> {
    Some(7)
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_expiry_days: default_expiry_days(),
        }
    }
}

/// OpenAI-compatible chat completion backend used by LLM capsules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "CAPFLOW_LLM_API_KEY".to_string()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// HTTP server bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
