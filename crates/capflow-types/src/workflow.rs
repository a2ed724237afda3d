//! Workflow definition types.
//!
//! A `Workflow` is a named, versioned graph of capsule nodes connected by
//! slot-to-slot edges. Each execution embeds a `WorkflowSnapshot` taken at
//! start so later edits never alter a running or historical execution.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactSlot;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned on creation.
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Incremented on every update (starts at 1).
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Nodes in declaration order. The order breaks scheduling ties.
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub variables: Vec<WorkflowVariable>,
    #[serde(default)]
    pub triggers: Vec<WorkflowTrigger>,
    /// Per-execution node concurrency (None = engine default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl Workflow {
    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn variable(&self, key: &str) -> Option<&WorkflowVariable> {
        self.variables.iter().find(|v| v.key == key)
    }

    /// Freeze the graph for an execution.
    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            variables: self.variables.clone(),
            max_concurrency: self.max_concurrency,
        }
    }
}

/// A single node in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique within a workflow.
    pub node_id: String,
    pub name: String,
    /// Capsule type key (e.g. "http-request").
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub inputs: Vec<ArtifactSlot>,
    #[serde(default)]
    pub outputs: Vec<ArtifactSlot>,
    /// Canvas position (editor metadata only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<CanvasPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Input slots fed from workflow variables instead of edges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<VariableBinding>,
}

impl WorkflowNode {
    pub fn input(&self, slot_id: &str) -> Option<&ArtifactSlot> {
        self.inputs.iter().find(|s| s.slot_id == slot_id)
    }

    pub fn output(&self, slot_id: &str) -> Option<&ArtifactSlot> {
        self.outputs.iter().find(|s| s.slot_id == slot_id)
    }

    /// Effective attempt limit (a node without a policy runs once).
    pub fn max_attempts(&self) -> u32 {
        self.retry.as_ref().map_or(1, |r| r.max_attempts.max(1))
    }
}

/// Canvas position coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasPosition {
    pub x: f64,
    pub y: f64,
}

/// Binds an input slot to a workflow variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableBinding {
    pub slot_id: String,
    pub variable_key: String,
}

/// A directed data connection from an output slot to an input slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    #[serde(default)]
    pub edge_id: String,
    pub source_node_id: String,
    pub source_slot_id: String,
    pub target_node_id: String,
    pub target_slot_id: String,
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Per-node retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (default 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts.
    #[serde(default)]
    pub delay_seconds: f64,
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

fn default_max_attempts() -> u32 {
    1
}

/// Upper bound on a single retry wait.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

impl RetryPolicy {
    /// Wait before the attempt following failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.delay_seconds.is_finite() || self.delay_seconds <= 0.0 {
            return Duration::ZERO;
        }
        let attempt = attempt.max(1);
        let secs = match self.backoff {
            BackoffStrategy::Fixed => self.delay_seconds,
            BackoffStrategy::Linear => self.delay_seconds * f64::from(attempt),
            BackoffStrategy::Exponential => {
                self.delay_seconds * 2f64.powi(attempt.saturating_sub(1).min(30) as i32)
            }
        };
        Duration::from_secs_f64(secs).min(MAX_RETRY_DELAY)
    }
}

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `delay_seconds * attempt`.
    #[default]
    Linear,
    /// `delay_seconds` every time.
    Fixed,
    /// `delay_seconds * 2^(attempt - 1)`.
    Exponential,
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A run-time input of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowVariable {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    /// Allowed values for `select` variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default)]
    pub required: bool,
    /// Resolved through the secret store; the value is a secret name.
    #[serde(default)]
    pub is_secret: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Boolean,
    Json,
    Select,
    File,
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// A configured way of starting the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    #[serde(default)]
    pub trigger_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub config: TriggerConfig,
}

fn default_enabled() -> bool {
    true
}

/// Trigger configuration, internally tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Started by a person through the API or CLI.
    Manual {},
    /// Cron schedule.
    Timer {
        /// Cron expression (5 or 6 fields) or a human-readable schedule.
        cron: String,
        /// "UTC" or a fixed offset such as "+08:00".
        #[serde(default = "default_timezone")]
        timezone: String,
    },
    /// Inbound HTTP call.
    Webhook {
        /// Path under the hooks endpoint (e.g. "daily-report").
        path: String,
        /// Secret used for HMAC-SHA256 signature verification.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_name: Option<String>,
    },
    /// A file uploaded into a `file` variable.
    FileUpload {
        variable_key: String,
        /// Accepted MIME types (empty = any).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        accept: Vec<String>,
    },
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl TriggerConfig {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Manual {} => TriggerType::Manual,
            Self::Timer { .. } => TriggerType::Timer,
            Self::Webhook { .. } => TriggerType::Webhook,
            Self::FileUpload { .. } => TriggerType::FileUpload,
        }
    }
}

/// How an execution was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Timer,
    Webhook,
    FileUpload,
    /// Re-run of a prior execution from a node.
    Resume,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Timer => "timer",
            Self::Webhook => "webhook",
            Self::FileUpload => "file_upload",
            Self::Resume => "resume",
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "timer" => Ok(Self::Timer),
            "webhook" => Ok(Self::Webhook),
            "file_upload" => Ok(Self::FileUpload),
            "resume" => Ok(Self::Resume),
            other => Err(format!("unknown trigger type: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Frozen copy of the graph embedded in each execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    /// Variable definitions, needed to re-resolve secrets on resume.
    #[serde(default)]
    pub variables: Vec<WorkflowVariable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl WorkflowSnapshot {
    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
