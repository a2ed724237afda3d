//! In-memory repository implementations backed by `DashMap`.
//!
//! Used by tests and by single-process deployments that do not need
//! durability across restarts.

use capflow_types::error::RepositoryError;
use capflow_types::event::ExecutionEvent;
use capflow_types::execution::{ExecutionStatus, WorkflowExecution};
use capflow_types::share::ShareLink;
use capflow_types::workflow::Workflow;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::execution::{ExecutionFilter, ExecutionRepository};
use super::share::ShareLinkRepository;
use super::workflow::WorkflowRepository;
use super::{Page, PageRequest};

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryWorkflowRepository {
    workflows: DashMap<Uuid, Workflow>,
}

impl MemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for MemoryWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.workflows.get(id).map(|w| w.clone()))
    }

    async fn list(
        &self,
        tag: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Workflow>, RepositoryError> {
        let mut items: Vec<Workflow> = self
            .workflows
            .iter()
            .filter(|w| tag.is_none_or(|t| w.tags.iter().any(|wt| wt == t)))
            .map(|w| w.clone())
            .collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(page.apply(items))
    }

    async fn list_all(&self) -> Result<Vec<Workflow>, RepositoryError> {
        Ok(self.workflows.iter().map(|w| w.clone()).collect())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.workflows.remove(id).is_some())
    }
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryExecutionRepository {
    executions: DashMap<Uuid, WorkflowExecution>,
    events: DashMap<Uuid, Vec<ExecutionEvent>>,
}

impl MemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionRepository for MemoryExecutionRepository {
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        self.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.executions.get(id).map(|e| e.clone()))
    }

    async fn list(
        &self,
        filter: &ExecutionFilter,
        page: PageRequest,
    ) -> Result<Page<WorkflowExecution>, RepositoryError> {
        let mut items: Vec<WorkflowExecution> = self
            .executions
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| e.clone())
            .collect();
        // UUIDv7 ids sort by creation time.
        items.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(page.apply(items))
    }

    async fn list_unfinished(&self) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        Ok(self
            .executions
            .iter()
            .filter(|e| matches!(e.status, ExecutionStatus::Queued | ExecutionStatus::Running))
            .map(|e| e.clone())
            .collect())
    }

    async fn append_share_link(
        &self,
        execution_id: &Uuid,
        share_link_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        let mut execution = self
            .executions
            .get_mut(execution_id)
            .ok_or(RepositoryError::NotFound)?;
        execution.share_link_ids.push(*share_link_id);
        Ok(())
    }

    async fn append_event(&self, event: &ExecutionEvent) -> Result<(), RepositoryError> {
        self.events
            .entry(event.execution_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn list_events_since(
        &self,
        execution_id: &Uuid,
        after_seq: u64,
    ) -> Result<Vec<ExecutionEvent>, RepositoryError> {
        let mut events: Vec<ExecutionEvent> = self
            .events
            .get(execution_id)
            .map(|log| log.iter().filter(|e| e.seq > after_seq).cloned().collect())
            .unwrap_or_default();
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Share links
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryShareLinkRepository {
    links: DashMap<Uuid, ShareLink>,
    by_token: DashMap<String, Uuid>,
}

impl MemoryShareLinkRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShareLinkRepository for MemoryShareLinkRepository {
    async fn create(&self, link: &ShareLink) -> Result<(), RepositoryError> {
        match self.by_token.entry(link.token.clone()) {
            Entry::Occupied(_) => {
                return Err(RepositoryError::Conflict(format!(
                    "share token '{}' already exists",
                    link.token
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(link.id);
            }
        }
        self.links.insert(link.id, link.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ShareLink>, RepositoryError> {
        Ok(self.links.get(id).map(|l| l.clone()))
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<ShareLink>, RepositoryError> {
        let Some(id) = self.by_token.get(token).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.links.get(&id).map(|l| l.clone()))
    }

    async fn list(&self) -> Result<Vec<ShareLink>, RepositoryError> {
        let mut links: Vec<ShareLink> = self.links.iter().map(|l| l.clone()).collect();
        links.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(links)
    }

    async fn revoke(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        match self.links.get_mut(id) {
            Some(mut link) => {
                link.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_view(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut link = self.links.get_mut(id).ok_or(RepositoryError::NotFound)?;
        link.view_count += 1;
        link.last_viewed_at = Some(at);
        Ok(())
    }
}
