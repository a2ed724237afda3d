//! Workflow store service.
//!
//! Every write runs full structural validation first; an invalid definition
//! is never saved, not even partially.

use std::sync::Arc;

use capflow_types::error::RepositoryError;
use capflow_types::workflow::Workflow;
use chrono::Utc;
use uuid::Uuid;

use super::fill_defaults;
use super::validation::{ValidationErrors, validate_workflow};
use crate::capsule::CapsuleRegistry;
use crate::repository::workflow::WorkflowRepository;
use crate::repository::{Page, PageRequest};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowServiceError {
    #[error("workflow not found: {0}")]
    NotFound(Uuid),

    #[error("workflow already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("workflow name cannot be empty")]
    EmptyName,

    #[error(transparent)]
    Invalid(#[from] ValidationErrors),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}

/// CRUD over workflow definitions.
///
/// Generic over the repository so core never depends on capflow-infra.
pub struct WorkflowService<R: WorkflowRepository> {
    repo: R,
    registry: Arc<CapsuleRegistry>,
}

impl<R: WorkflowRepository> WorkflowService<R> {
    pub fn new(repo: R, registry: Arc<CapsuleRegistry>) -> Self {
        Self { repo, registry }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn registry(&self) -> &Arc<CapsuleRegistry> {
        &self.registry
    }

    /// Fill implicit parts of a definition and validate it.
    pub fn prepare(&self, workflow: &mut Workflow) -> Result<(), WorkflowServiceError> {
        workflow.name = workflow.name.trim().to_string();
        if workflow.name.is_empty() {
            return Err(WorkflowServiceError::EmptyName);
        }
        fill_defaults(workflow, &self.registry);
        validate_workflow(workflow, &self.registry).map_err(ValidationErrors)?;
        Ok(())
    }

    /// Validate and store a new workflow at version 1.
    pub async fn create(&self, mut workflow: Workflow) -> Result<Workflow, WorkflowServiceError> {
        if workflow.id.is_nil() {
            workflow.id = Uuid::now_v7();
        }
        if self.repo.get(&workflow.id).await?.is_some() {
            return Err(WorkflowServiceError::AlreadyExists(workflow.id));
        }
        self.prepare(&mut workflow)?;

        let now = Utc::now();
        workflow.version = 1;
        workflow.created_at = now;
        workflow.updated_at = now;
        self.repo.save(&workflow).await?;

        tracing::info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            nodes = workflow.nodes.len(),
            "workflow created"
        );
        Ok(workflow)
    }

    /// Replace a workflow's definition, bumping its version.
    ///
    /// Running and historical executions keep their own snapshot and are
    /// unaffected.
    pub async fn update(
        &self,
        id: &Uuid,
        mut workflow: Workflow,
    ) -> Result<Workflow, WorkflowServiceError> {
        let existing = self
            .repo
            .get(id)
            .await?
            .ok_or(WorkflowServiceError::NotFound(*id))?;
        self.prepare(&mut workflow)?;

        workflow.id = existing.id;
        workflow.version = existing.version.saturating_add(1);
        workflow.created_at = existing.created_at;
        workflow.updated_at = Utc::now();
        self.repo.save(&workflow).await?;

        tracing::info!(workflow_id = %workflow.id, version = workflow.version, "workflow updated");
        Ok(workflow)
    }

    pub async fn get(&self, id: &Uuid) -> Result<Workflow, WorkflowServiceError> {
        self.repo
            .get(id)
            .await?
            .ok_or(WorkflowServiceError::NotFound(*id))
    }

    pub async fn list(
        &self,
        tag: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Workflow>, WorkflowServiceError> {
        Ok(self.repo.list(tag, page).await?)
    }

    pub async fn delete(&self, id: &Uuid) -> Result<(), WorkflowServiceError> {
        if self.repo.delete(id).await? {
            tracing::info!(workflow_id = %id, "workflow deleted");
            Ok(())
        } else {
            Err(WorkflowServiceError::NotFound(*id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::builtin_registry;
    use crate::repository::memory::MemoryWorkflowRepository;
    use crate::workflow::DefinitionError;
    use serde_json::json;

    fn service() -> WorkflowService<MemoryWorkflowRepository> {
        WorkflowService::new(MemoryWorkflowRepository::new(), builtin_registry())
    }

    fn definition(tags: &[&str]) -> Workflow {
        serde_json::from_value(json!({
            "name": "  Digest  ",
            "tags": tags,
            "nodes": [
                {"node_id": "start", "name": "Start", "type": "manual-trigger"},
                {"node_id": "render", "name": "Render", "type": "report-renderer",
                 "config": {"title": "Digest"}}
            ],
            "edges": [{"source_node_id": "start", "source_slot_id": "payload",
                       "target_node_id": "render", "target_slot_id": "content"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_fills_defaults_and_starts_at_version_one() {
        let svc = service();
        let mut wf = definition(&[]);
        wf.version = 9;
        let created = svc.create(wf).await.unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.name, "Digest");
        assert_eq!(created.nodes[1].inputs[0].slot_id, "content");
        assert_eq!(svc.get(&created.id).await.unwrap().name, "Digest");
    }

    #[tokio::test]
    async fn create_rejects_invalid_definition_without_saving() {
        let svc = service();
        let mut wf = definition(&[]);
        wf.edges.clear();
        let id = wf.id;
        match svc.create(wf).await {
            Err(WorkflowServiceError::Invalid(errors)) => {
                assert!(matches!(errors.errors()[0], DefinitionError::UnboundInput { .. }));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
        assert!(matches!(svc.get(&id).await, Err(WorkflowServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let svc = service();
        let created = svc.create(definition(&[])).await.unwrap();
        let again = svc.create(created.clone()).await;
        assert!(matches!(again, Err(WorkflowServiceError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn update_bumps_version_and_keeps_created_at() {
        let svc = service();
        let created = svc.create(definition(&[])).await.unwrap();

        let mut edit = definition(&["weekly"]);
        edit.name = "Weekly digest".to_string();
        let updated = svc.update(&created.id, edit).await.unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.version, 2);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);

        let missing = svc.update(&Uuid::now_v7(), definition(&[])).await;
        assert!(matches!(missing, Err(WorkflowServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_by_tag_and_delete() {
        let svc = service();
        let a = svc.create(definition(&["ops"])).await.unwrap();
        svc.create(definition(&["sales"])).await.unwrap();

        let ops = svc.list(Some("ops"), PageRequest::default()).await.unwrap();
        assert_eq!(ops.total, 1);
        assert_eq!(ops.items[0].id, a.id);
        assert_eq!(svc.list(None, PageRequest::default()).await.unwrap().total, 2);

        svc.delete(&a.id).await.unwrap();
        assert!(matches!(svc.delete(&a.id).await, Err(WorkflowServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let svc = service();
        let mut wf = definition(&[]);
        wf.name = "   ".to_string();
        assert!(matches!(svc.create(wf).await, Err(WorkflowServiceError::EmptyName)));
    }
}
