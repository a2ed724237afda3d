//! Turns trigger events into execution requests.
//!
//! The dispatcher owns the webhook route table (path -> workflow) and checks
//! every event against the workflow's configured triggers before anything
//! is submitted to the engine. Variable binding and secret resolution
//! happen in the engine; the dispatcher decides *which* values are offered.

use std::sync::{Arc, Mutex};

use capflow_types::execution::WorkflowExecution;
use capflow_types::workflow::{TriggerConfig, TriggerType, VariableType, Workflow};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::TriggerError;
use crate::engine::{ExecutionEngine, ExecutionRequest};
use crate::repository::execution::ExecutionRepository;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An external reason to start a workflow.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub workflow_id: Uuid,
    pub kind: TriggerKind,
    /// Who or what caused the event; defaults per kind when absent.
    pub actor: Option<String>,
    /// Raw event body (webhook JSON, timer metadata).
    pub payload: Option<Value>,
    /// Explicit variable values. These win over anything derived from the
    /// payload.
    pub variables: Map<String, Value>,
}

impl TriggerEvent {
    pub fn manual(workflow_id: Uuid, variables: Map<String, Value>) -> Self {
        Self {
            workflow_id,
            kind: TriggerKind::Manual,
            actor: None,
            payload: None,
            variables,
        }
    }

    pub fn timer(workflow_id: Uuid, trigger_id: impl Into<String>, fired_at: DateTime<Utc>) -> Self {
        Self {
            workflow_id,
            kind: TriggerKind::Timer {
                trigger_id: trigger_id.into(),
                fired_at,
            },
            actor: None,
            payload: None,
            variables: Map::new(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerKind {
    Manual,
    Timer {
        trigger_id: String,
        fired_at: DateTime<Utc>,
    },
    Webhook {
        path: String,
    },
    FileUpload {
        variable_key: String,
        file: UploadedFile,
    },
}

impl TriggerKind {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Manual => TriggerType::Manual,
            Self::Timer { .. } => TriggerType::Timer,
            Self::Webhook { .. } => TriggerType::Webhook,
            Self::FileUpload { .. } => TriggerType::FileUpload,
        }
    }
}

/// Metadata of a file that was uploaded into a `file` variable.
///
/// The bytes themselves live in the blob store under `storage_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub storage_key: String,
}

// ---------------------------------------------------------------------------
// Webhook routes
// ---------------------------------------------------------------------------

/// Where a webhook path leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRoute {
    pub workflow_id: Uuid,
    pub trigger_id: String,
    /// Name of the secret holding the HMAC key, if signatures are required.
    pub secret_name: Option<String>,
}

/// Leading and trailing slashes are not significant.
pub fn normalize_webhook_path(path: &str) -> String {
    path.trim().trim_matches('/').to_string()
}

// ---------------------------------------------------------------------------
// TriggerDispatcher
// ---------------------------------------------------------------------------

pub struct TriggerDispatcher<W: WorkflowRepository, E: ExecutionRepository> {
    workflows: Arc<W>,
    engine: ExecutionEngine<E>,
    webhooks: DashMap<String, WebhookRoute>,
    /// Held while the route table is checked and rewritten.
    registration: Mutex<()>,
}

impl<W: WorkflowRepository, E: ExecutionRepository + 'static> TriggerDispatcher<W, E> {
    pub fn new(workflows: Arc<W>, engine: ExecutionEngine<E>) -> Self {
        Self {
            workflows,
            engine,
            webhooks: DashMap::new(),
            registration: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &ExecutionEngine<E> {
        &self.engine
    }

    /// Register the webhook paths of every stored workflow.
    pub async fn load_routes(&self) -> Result<usize, TriggerError> {
        let mut registered = 0;
        for workflow in self.workflows.list_all().await? {
            match self.register_workflow(&workflow) {
                Ok(n) => registered += n,
                Err(e) => tracing::warn!(
                    workflow_id = %workflow.id,
                    error = %e,
                    "skipping webhook routes"
                ),
            }
        }
        Ok(registered)
    }

    /// Replace the webhook routes of `workflow` with its enabled webhook
    /// triggers. A path owned by another workflow is a conflict and leaves
    /// the table unchanged.
    pub fn register_workflow(&self, workflow: &Workflow) -> Result<usize, TriggerError> {
        let routes: Vec<(String, WebhookRoute)> = workflow
            .triggers
            .iter()
            .filter(|t| t.enabled)
            .filter_map(|t| match &t.config {
                TriggerConfig::Webhook { path, secret_name } => Some((
                    normalize_webhook_path(path),
                    WebhookRoute {
                        workflow_id: workflow.id,
                        trigger_id: t.trigger_id.clone(),
                        secret_name: secret_name.clone(),
                    },
                )),
                _ => None,
            })
            .collect();

        let _guard = self.registration.lock().unwrap_or_else(|e| e.into_inner());
        for (path, _) in &routes {
            let owner = self.webhooks.get(path).map(|r| r.workflow_id);
            if let Some(owner) = owner.filter(|id| *id != workflow.id) {
                return Err(TriggerError::WebhookPathTaken {
                    path: path.clone(),
                    workflow_id: owner,
                });
            }
        }

        self.remove_routes(&workflow.id);
        let count = routes.len();
        for (path, route) in routes {
            tracing::info!(%path, workflow_id = %workflow.id, "registered webhook");
            self.webhooks.insert(path, route);
        }
        Ok(count)
    }

    /// Drop every webhook route of a workflow.
    pub fn unregister_workflow(&self, workflow_id: &Uuid) {
        let _guard = self.registration.lock().unwrap_or_else(|e| e.into_inner());
        self.remove_routes(workflow_id);
    }

    fn remove_routes(&self, workflow_id: &Uuid) {
        self.webhooks.retain(|_, route| route.workflow_id != *workflow_id);
    }

    pub fn webhook_route(&self, path: &str) -> Option<WebhookRoute> {
        self.webhooks
            .get(&normalize_webhook_path(path))
            .map(|r| r.value().clone())
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Start an execution for `event`. Returns the `queued` record.
    pub async fn dispatch(&self, event: TriggerEvent) -> Result<WorkflowExecution, TriggerError> {
        let workflow = self
            .workflows
            .get(&event.workflow_id)
            .await?
            .ok_or(TriggerError::WorkflowNotFound(event.workflow_id))?;

        let trigger_type = event.kind.trigger_type();
        if !accepts(&workflow, &event.kind) {
            return Err(TriggerError::NoMatchingTrigger {
                workflow_id: workflow.id,
                trigger_type,
            });
        }

        let variables = offered_variables(&workflow, &event)?;
        let actor = event.actor.clone().unwrap_or_else(|| default_actor(&event.kind));
        let request = ExecutionRequest::new(trigger_type, variables).triggered_by(actor);

        let execution = self.engine.submit(&workflow, request).await?;
        tracing::info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            trigger = trigger_type.as_str(),
            "trigger dispatched"
        );
        Ok(execution)
    }

    /// Dispatch the workflow registered at `path`.
    pub async fn dispatch_webhook(
        &self,
        path: &str,
        payload: Option<Value>,
    ) -> Result<WorkflowExecution, TriggerError> {
        let path = normalize_webhook_path(path);
        let route = self
            .webhook_route(&path)
            .ok_or_else(|| TriggerError::WebhookNotFound(path.clone()))?;
        self.dispatch(TriggerEvent {
            workflow_id: route.workflow_id,
            kind: TriggerKind::Webhook { path },
            actor: None,
            payload,
            variables: Map::new(),
        })
        .await
    }
}

/// Whether the workflow has an enabled trigger matching `kind`.
fn accepts(workflow: &Workflow, kind: &TriggerKind) -> bool {
    if matches!(kind, TriggerKind::Manual) {
        return true;
    }
    workflow
        .triggers
        .iter()
        .filter(|t| t.enabled)
        .any(|t| match (&t.config, kind) {
            (TriggerConfig::Timer { .. }, TriggerKind::Timer { trigger_id, .. }) => {
                t.trigger_id == *trigger_id
            }
            (TriggerConfig::Webhook { path, .. }, TriggerKind::Webhook { path: called }) => {
                normalize_webhook_path(path) == *called
            }
            (
                TriggerConfig::FileUpload { variable_key, .. },
                TriggerKind::FileUpload {
                    variable_key: uploaded,
                    ..
                },
            ) => variable_key == uploaded,
            _ => false,
        })
}

/// Values offered to variable binding for this event.
///
/// - webhook: top-level payload fields named like a declared variable
/// - file upload: the file metadata under its variable key
/// - explicit `event.variables` always win
fn offered_variables(
    workflow: &Workflow,
    event: &TriggerEvent,
) -> Result<Map<String, Value>, TriggerError> {
    let mut offered = Map::new();

    match &event.kind {
        TriggerKind::Webhook { .. } => {
            if let Some(Value::Object(body)) = &event.payload {
                for variable in &workflow.variables {
                    if let Some(value) = body.get(&variable.key) {
                        offered.insert(variable.key.clone(), value.clone());
                    }
                }
            }
        }
        TriggerKind::FileUpload { variable_key, file } => {
            let accept = workflow.triggers.iter().find_map(|t| match &t.config {
                TriggerConfig::FileUpload {
                    variable_key: key,
                    accept,
                } if t.enabled && key == variable_key => Some(accept),
                _ => None,
            });
            let rejected = accept.is_some_and(|accept| {
                !accept.is_empty() && !accept.iter().any(|m| mime_matches(m, &file.mime_type))
            });
            if rejected {
                return Err(TriggerError::RejectedUpload(format!(
                    "'{}' is not an accepted file type for '{variable_key}'",
                    file.mime_type
                )));
            }
            match workflow.variable(variable_key) {
                Some(v) if v.var_type == VariableType::File => {}
                _ => {
                    return Err(TriggerError::RejectedUpload(format!(
                        "'{variable_key}' is not a file variable"
                    )));
                }
            }
            let metadata = serde_json::to_value(file)
                .map_err(|e| TriggerError::RejectedUpload(e.to_string()))?;
            offered.insert(variable_key.clone(), metadata);
        }
        TriggerKind::Manual | TriggerKind::Timer { .. } => {}
    }

    offered.extend(event.variables.clone());
    Ok(offered)
}

/// `image/*` style wildcards are allowed.
fn mime_matches(pattern: &str, mime_type: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(family) => mime_type
            .split_once('/')
            .is_some_and(|(top, _)| top.eq_ignore_ascii_case(family)),
        None => pattern.eq_ignore_ascii_case(mime_type),
    }
}

fn default_actor(kind: &TriggerKind) -> String {
    match kind {
        TriggerKind::Manual => "manual".to_string(),
        TriggerKind::Timer { trigger_id, .. } => format!("scheduler:{trigger_id}"),
        TriggerKind::Webhook { path } => format!("webhook:{path}"),
        TriggerKind::FileUpload { file, .. } => format!("upload:{}", file.file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactResolver, BoxBlobStore, MemoryBlobStore};
    use crate::capsule::{SimulatedServices, builtin_registry};
    use crate::engine::EngineError;
    use crate::repository::memory::{MemoryExecutionRepository, MemoryWorkflowRepository};
    use capflow_types::config::EngineSettings;
    use capflow_types::execution::ExecutionStatus;
    use serde_json::json;

    type Dispatcher = TriggerDispatcher<MemoryWorkflowRepository, MemoryExecutionRepository>;

    fn workflow() -> Workflow {
        serde_json::from_value(json!({
            "name": "intake",
            "variables": [
                {"key": "team", "type": "string", "default_value": "ops"},
                {"key": "attachment", "type": "file"}
            ],
            "nodes": [
                {"node_id": "start", "name": "Start", "type": "manual-trigger"},
                {"node_id": "report", "name": "Report", "type": "report-renderer",
                 "config": {"title": "Intake for {{vars.team}}"}}
            ],
            "edges": [{"source_node_id": "start", "source_slot_id": "payload",
                       "target_node_id": "report", "target_slot_id": "content"}],
            "triggers": [
                {"trigger_id": "nightly", "type": "timer", "cron": "0 2 * * *"},
                {"trigger_id": "hook", "type": "webhook", "path": "/intake/"},
                {"trigger_id": "off", "type": "webhook", "path": "disabled", "enabled": false},
                {"trigger_id": "upload", "type": "file_upload", "variable_key": "attachment",
                 "accept": ["application/pdf", "image/*"]}
            ]
        }))
        .unwrap()
    }

    async fn dispatcher() -> (Dispatcher, Workflow) {
        let repo = Arc::new(MemoryWorkflowRepository::new());
        let wf = workflow();
        repo.save(&wf).await.unwrap();
        let engine = ExecutionEngine::new(
            MemoryExecutionRepository::new(),
            builtin_registry(),
            ArtifactResolver::new(BoxBlobStore::new(MemoryBlobStore::new()), 1024),
            Arc::new(SimulatedServices),
            EngineSettings::default(),
        );
        let dispatcher = TriggerDispatcher::new(repo, engine);
        assert_eq!(dispatcher.load_routes().await.unwrap(), 1);
        (dispatcher, wf)
    }

    fn upload(mime_type: &str) -> UploadedFile {
        UploadedFile {
            file_name: "scan.pdf".to_string(),
            mime_type: mime_type.to_string(),
            size_bytes: 2048,
            storage_key: "uploads/scan.pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn manual_dispatch_binds_defaults_and_actor() {
        let (dispatcher, wf) = dispatcher().await;
        let event = TriggerEvent::manual(wf.id, Map::new()).with_actor("alice");

        let queued = dispatcher.dispatch(event).await.unwrap();

        assert_eq!(queued.status, ExecutionStatus::Queued);
        assert_eq!(queued.trigger_type, TriggerType::Manual);
        assert_eq!(queued.triggered_by.as_deref(), Some("alice"));
        assert_eq!(queued.variables["team"], "ops");
    }

    #[tokio::test]
    async fn webhook_payload_fields_become_variables() {
        let (dispatcher, wf) = dispatcher().await;

        let queued = dispatcher
            .dispatch_webhook("intake", Some(json!({"team": "billing", "noise": 1})))
            .await
            .unwrap();

        assert_eq!(queued.workflow_id, wf.id);
        assert_eq!(queued.trigger_type, TriggerType::Webhook);
        assert_eq!(queued.triggered_by.as_deref(), Some("webhook:intake"));
        assert_eq!(queued.variables["team"], "billing");
        assert!(!queued.variables.contains_key("noise"));
    }

    #[tokio::test]
    async fn unknown_and_disabled_webhooks_are_not_found() {
        let (dispatcher, _) = dispatcher().await;
        for path in ["nope", "disabled"] {
            assert!(matches!(
                dispatcher.dispatch_webhook(path, None).await,
                Err(TriggerError::WebhookNotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn timer_dispatch_requires_a_matching_trigger() {
        let (dispatcher, wf) = dispatcher().await;

        let queued = dispatcher
            .dispatch(TriggerEvent::timer(wf.id, "nightly", Utc::now()))
            .await
            .unwrap();
        assert_eq!(queued.trigger_type, TriggerType::Timer);
        assert_eq!(queued.triggered_by.as_deref(), Some("scheduler:nightly"));

        assert!(matches!(
            dispatcher
                .dispatch(TriggerEvent::timer(wf.id, "hourly", Utc::now()))
                .await,
            Err(TriggerError::NoMatchingTrigger { .. })
        ));
    }

    #[tokio::test]
    async fn file_upload_checks_mime_type() {
        let (dispatcher, wf) = dispatcher().await;
        let event = |mime: &str| TriggerEvent {
            workflow_id: wf.id,
            kind: TriggerKind::FileUpload {
                variable_key: "attachment".to_string(),
                file: upload(mime),
            },
            actor: None,
            payload: None,
            variables: Map::new(),
        };

        let queued = dispatcher.dispatch(event("image/png")).await.unwrap();
        assert_eq!(queued.variables["attachment"]["storage_key"], "uploads/scan.pdf");

        assert!(matches!(
            dispatcher.dispatch(event("text/csv")).await,
            Err(TriggerError::RejectedUpload(_))
        ));
    }

    #[tokio::test]
    async fn missing_workflow_and_invalid_variables_are_reported() {
        let (dispatcher, wf) = dispatcher().await;

        assert!(matches!(
            dispatcher
                .dispatch(TriggerEvent::manual(Uuid::now_v7(), Map::new()))
                .await,
            Err(TriggerError::WorkflowNotFound(_))
        ));

        let mut vars = Map::new();
        vars.insert("team".to_string(), json!({"not": "a string"}));
        assert!(matches!(
            dispatcher.dispatch(TriggerEvent::manual(wf.id, vars)).await,
            Err(TriggerError::Engine(EngineError::Variable(_)))
        ));
    }

    #[tokio::test]
    async fn webhook_path_conflicts_are_rejected() {
        let (dispatcher, _) = dispatcher().await;
        let mut other = workflow();
        other.id = Uuid::now_v7();

        assert!(matches!(
            dispatcher.register_workflow(&other),
            Err(TriggerError::WebhookPathTaken { .. })
        ));

        dispatcher.unregister_workflow(&dispatcher.webhook_route("intake").unwrap().workflow_id);
        assert_eq!(dispatcher.register_workflow(&other).unwrap(), 1);
        assert_eq!(dispatcher.webhook_route("/intake").unwrap().workflow_id, other.id);
    }

    #[tokio::test]
    async fn concurrent_registrations_of_one_path_have_a_single_winner() {
        let (dispatcher, _) = dispatcher().await;
        let contenders: Vec<Workflow> = (0..8)
            .map(|_| {
                let mut wf = workflow();
                wf.id = Uuid::now_v7();
                for trigger in &mut wf.triggers {
                    if let TriggerConfig::Webhook { path, .. } = &mut trigger.config {
                        *path = "race".to_string();
                    }
                }
                wf
            })
            .collect();

        let barrier = std::sync::Barrier::new(contenders.len());
        let results: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = contenders
                .iter()
                .map(|wf| {
                    let (dispatcher, barrier) = (&dispatcher, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        dispatcher.register_workflow(wf).is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
        let winner = results.iter().position(|ok| *ok).unwrap();
        assert_eq!(dispatcher.webhook_route("race").unwrap().workflow_id, contenders[winner].id);
    }

    #[test]
    fn mime_wildcards() {
        assert!(mime_matches("image/*", "image/png"));
        assert!(mime_matches("application/pdf", "Application/PDF"));
        assert!(!mime_matches("image/*", "text/plain"));
    }
}
