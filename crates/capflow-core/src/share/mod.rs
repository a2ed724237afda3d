//! Share links: publish a finished execution's artifacts behind a token.
//!
//! A link freezes the list of artifact references at creation time. Revoked
//! and expired links are kept for audit but never resolve again.

use capflow_types::artifact::{ArtifactContent, ArtifactRef, ExecutionArtifact};
use capflow_types::config::ShareSettings;
use capflow_types::error::RepositoryError;
use capflow_types::execution::{ExecutionStatus, NodeStatus, WorkflowExecution};
use capflow_types::share::{AccessLevel, ShareLink, ShareResourceType};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::artifact::ArtifactError;
use crate::engine::{EngineError, ExecutionEngine};
use crate::repository::execution::ExecutionRepository;
use crate::repository::share::ShareLinkRepository;

/// Attempts at generating a token that is not already taken.
const TOKEN_ATTEMPTS: usize = 3;

/// Longest lifetime a link may be given.
pub const MAX_EXPIRY_DAYS: u32 = 3650;

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    /// Unknown token or link ID.
    #[error("share link not found")]
    NotFound,

    /// The link exists but may not be viewed (revoked, expired, or
    /// sign-in required).
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("execution cannot be shared: {0}")]
    NotShareable(String),

    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),

    #[error("artifact {0} is not part of this share")]
    UnknownArtifact(Uuid),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<EngineError> for ShareError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(id) => Self::ExecutionNotFound(id),
            EngineError::Repository(e) => Self::Repository(e),
            other => Self::NotShareable(other.to_string()),
        }
    }
}

/// Parameters for `ShareLinkService::create`.
#[derive(Debug, Clone)]
pub struct CreateShareLink {
    pub execution_id: Uuid,
    pub access_level: AccessLevel,
    /// `None` applies the configured default; `Some(0)` never expires.
    pub expires_in_days: Option<u32>,
    /// Explicit selection; defaults to the execution's final artifacts.
    pub artifact_ids: Option<Vec<Uuid>>,
    pub title: Option<String>,
    pub created_by: Option<String>,
}

impl CreateShareLink {
    pub fn new(execution_id: Uuid, access_level: AccessLevel) -> Self {
        Self {
            execution_id,
            access_level,
            expires_in_days: None,
            artifact_ids: None,
            title: None,
            created_by: None,
        }
    }
}

/// What a successful resolve exposes.
#[derive(Debug, Clone, Serialize)]
pub struct SharedView {
    pub link: ShareLink,
    pub workflow_name: String,
    pub execution_status: ExecutionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub artifacts: Vec<ExecutionArtifact>,
}

pub struct ShareLinkService<S: ShareLinkRepository, E: ExecutionRepository> {
    links: S,
    engine: ExecutionEngine<E>,
    settings: ShareSettings,
}

impl<S: ShareLinkRepository, E: ExecutionRepository + 'static> ShareLinkService<S, E> {
    pub fn new(links: S, engine: ExecutionEngine<E>, settings: ShareSettings) -> Self {
        Self {
            links,
            engine,
            settings,
        }
    }

    pub fn url_for(&self, link: &ShareLink) -> String {
        format!("{}/s/{}", self.settings.base_url.trim_end_matches('/'), link.token)
    }

    /// Publish artifacts of a finished execution. Returns the link and its URL.
    pub async fn create(&self, request: CreateShareLink) -> Result<(ShareLink, String), ShareError> {
        let now = Utc::now();
        let expires_at = expiry_from(now, request.expires_in_days.or(self.settings.default_expiry_days))?;

        let execution = self.engine.get(&request.execution_id).await?;
        if !execution.status.is_terminal() {
            return Err(ShareError::NotShareable(format!(
                "execution is still {}",
                execution.status
            )));
        }
        if !execution
            .node_executions
            .iter()
            .any(|n| n.status == NodeStatus::Completed)
        {
            return Err(ShareError::NotShareable("no node completed".to_string()));
        }

        let artifacts = select_artifacts(&execution, request.artifact_ids.as_deref())?;
        if artifacts.is_empty() {
            return Err(ShareError::NotShareable("no artifacts to share".to_string()));
        }

        let mut link = ShareLink {
            id: Uuid::now_v7(),
            token: new_token(),
            resource_type: ShareResourceType::Execution,
            resource_id: execution.id,
            access_level: request.access_level,
            title: request.title,
            artifacts,
            revoked: false,
            view_count: 0,
            created_by: request.created_by,
            created_at: now,
            expires_at,
            last_viewed_at: None,
        };

        let mut attempt = 1;
        loop {
            match self.links.create(&link).await {
                Ok(()) => break,
                Err(RepositoryError::Conflict(_)) if attempt < TOKEN_ATTEMPTS => {
                    link.token = new_token();
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.engine
            .repository()
            .append_share_link(&execution.id, &link.id)
            .await?;

        tracing::info!(
            share_id = %link.id,
            execution_id = %execution.id,
            access = link.access_level.as_str(),
            artifacts = link.artifacts.len(),
            "share link created"
        );
        let url = self.url_for(&link);
        Ok((link, url))
    }

    /// Every link, revoked and expired ones included.
    pub async fn list(&self) -> Result<Vec<ShareLink>, ShareError> {
        Ok(self.links.list().await?)
    }

    pub async fn get(&self, id: &Uuid) -> Result<ShareLink, ShareError> {
        self.links.get(id).await?.ok_or(ShareError::NotFound)
    }

    /// Revoke a link. Revoking twice is not an error.
    pub async fn revoke(&self, id: &Uuid) -> Result<ShareLink, ShareError> {
        if !self.links.revoke(id).await? {
            return Err(ShareError::NotFound);
        }
        tracing::info!(share_id = %id, "share link revoked");
        self.get(id).await
    }

    pub async fn resolve(
        &self,
        token: &str,
        viewer_authenticated: bool,
    ) -> Result<SharedView, ShareError> {
        self.resolve_at(token, viewer_authenticated, Utc::now()).await
    }

    /// Resolve `token` as of `now` and count the view.
    pub async fn resolve_at(
        &self,
        token: &str,
        viewer_authenticated: bool,
        now: DateTime<Utc>,
    ) -> Result<SharedView, ShareError> {
        let link = self.viewable(token, viewer_authenticated, now).await?;
        let execution = self.engine.get(&link.resource_id).await?;

        if let Err(e) = self.links.record_view(&link.id, now).await {
            tracing::warn!(share_id = %link.id, error = %e, "failed to record share view");
        }

        let artifacts = link
            .artifacts
            .iter()
            .filter_map(|r| find_artifact(&execution, r).cloned())
            .collect();
        Ok(SharedView {
            workflow_name: execution.workflow_name.clone(),
            execution_status: execution.status,
            completed_at: execution.completed_at,
            artifacts,
            link,
        })
    }

    /// Payload of one shared artifact. Does not count as a view.
    pub async fn artifact_content(
        &self,
        token: &str,
        artifact_id: &Uuid,
        viewer_authenticated: bool,
    ) -> Result<(ExecutionArtifact, ArtifactContent), ShareError> {
        let link = self.viewable(token, viewer_authenticated, Utc::now()).await?;
        let reference = link
            .artifacts
            .iter()
            .find(|r| r.artifact_id == *artifact_id)
            .ok_or(ShareError::UnknownArtifact(*artifact_id))?;
        let execution = self.engine.get(&link.resource_id).await?;
        let artifact = find_artifact(&execution, reference)
            .cloned()
            .ok_or(ShareError::UnknownArtifact(*artifact_id))?;
        let content = self
            .engine
            .artifact_resolver()
            .resolve_ref(reference, &execution)
            .await?;
        Ok((artifact, content))
    }

    async fn viewable(
        &self,
        token: &str,
        viewer_authenticated: bool,
        now: DateTime<Utc>,
    ) -> Result<ShareLink, ShareError> {
        let link = self
            .links
            .get_by_token(token)
            .await?
            .ok_or(ShareError::NotFound)?;
        if link.revoked {
            return Err(ShareError::AccessDenied("link has been revoked".to_string()));
        }
        if link.is_expired_at(now) {
            return Err(ShareError::AccessDenied("link has expired".to_string()));
        }
        if link.access_level == AccessLevel::Authenticated && !viewer_authenticated {
            return Err(ShareError::AccessDenied("sign-in required".to_string()));
        }
        Ok(link)
    }
}

/// 32 lowercase hex characters.
fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn select_artifacts(
    execution: &WorkflowExecution,
    artifact_ids: Option<&[Uuid]>,
) -> Result<Vec<ArtifactRef>, ShareError> {
    let reference = |artifact_id: &Uuid| {
        execution.node_executions.iter().find_map(|node| {
            node.output_artifacts
                .iter()
                .find(|a| a.artifact_id == *artifact_id)
                .map(|a| ArtifactRef {
                    source_node_id: node.node_id.clone(),
                    source_slot_id: a.slot_id.clone(),
                    artifact_id: a.artifact_id,
                })
        })
    };

    match artifact_ids {
        Some(ids) => ids
            .iter()
            .map(|id| reference(id).ok_or(ShareError::UnknownArtifact(*id)))
            .collect(),
        None => Ok(execution
            .final_artifacts
            .iter()
            .filter_map(|a| reference(&a.artifact_id))
            .collect()),
    }
}

fn find_artifact<'a>(
    execution: &'a WorkflowExecution,
    reference: &ArtifactRef,
) -> Option<&'a ExecutionArtifact> {
    execution
        .node(&reference.source_node_id)?
        .output_artifacts
        .iter()
        .find(|a| a.artifact_id == reference.artifact_id)
}

/// `None` and `Some(0)` mean the link never expires.
fn expiry_from(now: DateTime<Utc>, days: Option<u32>) -> Result<Option<DateTime<Utc>>, ShareError> {
    let days = match days {
        None | Some(0) => return Ok(None),
        Some(days) => days,
    };
    if days > MAX_EXPIRY_DAYS {
        return Err(ShareError::InvalidExpiry(format!(
            "{days} days exceeds the maximum of {MAX_EXPIRY_DAYS}"
        )));
    }
    TimeDelta::try_days(i64::from(days))
        .and_then(|delta| now.checked_add_signed(delta))
        .map(Some)
        .ok_or_else(|| ShareError::InvalidExpiry(format!("{days} days is out of range")))
}
