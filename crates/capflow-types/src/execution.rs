//! Execution records: one `WorkflowExecution` per run, one `NodeExecution`
//! per node in the frozen snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::{ArtifactRef, ExecutionArtifact};
use crate::workflow::{TriggerType, WorkflowNode, WorkflowSnapshot};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status of a whole execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: '{other}'")),
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single node within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 execution ID.
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Denormalized for display.
    pub workflow_name: String,
    pub workflow_version: u32,
    /// Graph frozen at execution start.
    pub snapshot: WorkflowSnapshot,
    pub trigger_type: TriggerType,
    /// Who or what started the run (user id, "scheduler", webhook path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    pub status: ExecutionStatus,
    /// Bound variables. Secret values are never stored here.
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
    /// Node records in snapshot declaration order.
    pub node_executions: Vec<NodeExecution>,
    /// Outputs of sink nodes that completed.
    #[serde(default)]
    pub final_artifacts: Vec<ExecutionArtifact>,
    #[serde(default)]
    pub share_link_ids: Vec<Uuid>,
    /// Incremented on every observable state change.
    pub last_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<ResumeOrigin>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn node(&self, node_id: &str) -> Option<&NodeExecution> {
        self.node_executions.iter().find(|n| n.node_id == node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeExecution> {
        self.node_executions.iter_mut().find(|n| n.node_id == node_id)
    }

    /// Every artifact produced by any node of this execution.
    pub fn all_artifacts(&self) -> impl Iterator<Item = &ExecutionArtifact> {
        self.node_executions
            .iter()
            .flat_map(|n| n.output_artifacts.iter())
    }
}

/// Link from a resumed execution back to its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeOrigin {
    pub execution_id: Uuid,
    pub node_id: String,
}

// ---------------------------------------------------------------------------
// NodeExecution
// ---------------------------------------------------------------------------

/// Per-node execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
    pub status: NodeStatus,
    /// Attempts started so far (1-based once running).
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub logs: Vec<NodeLogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub input_artifact_refs: Vec<ArtifactRef>,
    #[serde(default)]
    pub output_artifacts: Vec<ExecutionArtifact>,
}

impl NodeExecution {
    /// Fresh record for a node that has not run yet.
    pub fn pending(node: &WorkflowNode) -> Self {
        Self {
            node_id: node.node_id.clone(),
            node_name: node.name.clone(),
            node_type: node.node_type.clone(),
            status: NodeStatus::Pending,
            attempt_count: 0,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            logs: Vec::new(),
            error_message: None,
            input_artifact_refs: Vec::new(),
            output_artifacts: Vec::new(),
        }
    }

    pub fn output_for_slot(&self, slot_id: &str) -> Option<&ExecutionArtifact> {
        self.output_artifacts.iter().find(|a| a.slot_id == slot_id)
    }
}

/// One log line attached to a node record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl NodeLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}
