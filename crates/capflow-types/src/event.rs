//! Progress events emitted while an execution runs.
//!
//! Every event carries the execution's `seq` at the time it was produced, so
//! a consumer that reconnects with its last-seen seq receives only newer
//! events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::ExecutionStatus;

/// A sequenced progress event for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub execution_id: Uuid,
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ExecutionEventKind,
}

/// What changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEventKind {
    ExecutionQueued,
    ExecutionStarted,
    NodeStarted {
        node_id: String,
        attempt: u32,
    },
    NodeRetrying {
        node_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    NodeCompleted {
        node_id: String,
        attempt_count: u32,
        duration_ms: u64,
    },
    NodeFailed {
        node_id: String,
        error: String,
    },
    NodeSkipped {
        node_id: String,
        reason: String,
    },
    ArtifactProduced {
        node_id: String,
        slot_id: String,
        artifact_id: Uuid,
    },
    ExecutionFinished {
        status: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

impl ExecutionEventKind {
    /// Node the event is about, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeRetrying { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeSkipped { node_id, .. }
            | Self::ArtifactProduced { node_id, .. } => Some(node_id),
            Self::ExecutionQueued | Self::ExecutionStarted | Self::ExecutionFinished { .. } => {
                None
            }
        }
    }
}
