//! Workflow repository trait definition.

use capflow_types::error::RepositoryError;
use capflow_types::workflow::Workflow;
use uuid::Uuid;

use super::{Page, PageRequest};

/// Storage for workflow definitions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    /// Upsert a workflow (insert or replace by ID).
    fn save(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// List workflows, newest update first, optionally restricted to a tag.
    fn list(
        &self,
        tag: Option<&str>,
        page: PageRequest,
    ) -> impl std::future::Future<Output = Result<Page<Workflow>, RepositoryError>> + Send;

    /// All workflows (used to register triggers at startup).
    fn list_all(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Delete by ID. Returns `true` if it existed.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
