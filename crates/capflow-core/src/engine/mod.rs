//! Execution engine: turns a validated workflow into a tracked run.
//!
//! - `executor` -- `ExecutionEngine`: submit, resume, cancel and queries
//! - `plan` -- index view of a frozen snapshot and node readiness
//! - `node` -- the per-node task (inputs, attempts, outputs)
//! - `retry` -- retry decisions and interruptible backoff waits
//! - `recorder` -- seq-numbered persistence and event publication
//! - `variables` -- variable binding and secret resolution

pub mod executor;
pub mod node;
pub mod plan;
pub mod recorder;
pub mod retry;
pub mod variables;

use capflow_types::error::RepositoryError;
use capflow_types::execution::ExecutionStatus;
use capflow_types::workflow::TriggerType;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::workflow::ValidationErrors;

pub use executor::ExecutionEngine;
pub use variables::{SecretError, SecretFuture, SecretResolver, VariableError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),

    #[error("execution not found: {0}")]
    NotFound(Uuid),

    #[error("execution {execution_id} is {status}; only finished executions can be resumed")]
    NotResumable {
        execution_id: Uuid,
        status: ExecutionStatus,
    },

    #[error("node '{node_id}' is not part of execution {execution_id}")]
    UnknownNode { execution_id: Uuid, node_id: String },

    #[error("execution {execution_id} already finished as {status}")]
    AlreadyTerminal {
        execution_id: Uuid,
        status: ExecutionStatus,
    },

    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("execution task failed: {0}")]
    Internal(String),
}

/// How and with what a new execution starts.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub trigger_type: TriggerType,
    pub triggered_by: Option<String>,
    pub variables: Map<String, Value>,
}

impl ExecutionRequest {
    pub fn new(trigger_type: TriggerType, variables: Map<String, Value>) -> Self {
        Self {
            trigger_type,
            triggered_by: None,
            variables,
        }
    }

    pub fn manual(variables: Map<String, Value>) -> Self {
        Self::new(TriggerType::Manual, variables)
    }

    pub fn triggered_by(mut self, actor: impl Into<String>) -> Self {
        self.triggered_by = Some(actor.into());
        self
    }
}
