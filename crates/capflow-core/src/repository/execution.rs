//! Execution repository trait definition.
//!
//! Executions are written by the engine only. The event log is append-only
//! and keyed by `(execution_id, seq)`.

use capflow_types::error::RepositoryError;
use capflow_types::event::ExecutionEvent;
use capflow_types::execution::{ExecutionStatus, WorkflowExecution};
use uuid::Uuid;

use super::{Page, PageRequest};

/// Filter for execution list queries.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub workflow_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
}

impl ExecutionFilter {
    pub fn matches(&self, execution: &WorkflowExecution) -> bool {
        self.workflow_id.is_none_or(|id| execution.workflow_id == id)
            && self.status.is_none_or(|s| execution.status == s)
    }
}

pub trait ExecutionRepository: Send + Sync {
    /// Upsert the full execution record.
    fn save(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// List executions, newest first.
    fn list(
        &self,
        filter: &ExecutionFilter,
        page: PageRequest,
    ) -> impl std::future::Future<Output = Result<Page<WorkflowExecution>, RepositoryError>> + Send;

    /// Executions left `queued` or `running` (crash recovery).
    fn list_unfinished(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// Atomically append a share link ID to an execution.
    fn append_share_link(
        &self,
        execution_id: &Uuid,
        share_link_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn append_event(
        &self,
        event: &ExecutionEvent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Events with `seq > after_seq`, ascending.
    fn list_events_since(
        &self,
        execution_id: &Uuid,
        after_seq: u64,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionEvent>, RepositoryError>> + Send;
}
