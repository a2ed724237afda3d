//! Workflow CRUD and trigger handlers for the REST API.
//!
//! Saving a workflow also makes its triggers live: webhook paths are
//! registered with the dispatcher and timer triggers are scheduled.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use capflow_core::trigger::{TriggerEvent, TriggerKind, UploadedFile};
use capflow_types::execution::WorkflowExecution;
use capflow_types::workflow::Workflow;

use crate::http::error::AppError;
use crate::http::extractors::query::WorkflowListQuery;
use crate::http::extractors::viewer::Viewer;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteWorkflowRequest {
    /// Variable values keyed by variable key.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub file_name: String,
}

/// Parse a JSON body that may be empty.
pub(crate) fn optional_json<T: serde::de::DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))
}

fn execution_links(resp: ApiResponse<WorkflowExecution>, id: Uuid) -> ApiResponse<WorkflowExecution> {
    resp.with_link("self", &format!("/api/v1/executions/{id}"))
        .with_link("events", &format!("/api/v1/executions/{id}/events"))
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

/// POST /api/v1/workflows - Validate and store a new workflow.
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(body): Json<Workflow>,
) -> Result<(StatusCode, Json<ApiResponse<Workflow>>), AppError> {
    let clock = RequestClock::start();

    state.check_webhook_paths(&body)?;
    let workflow = state.workflow_service.create(body).await?;
    state.activate_triggers(&workflow).await?;

    let id = workflow.id;
    let resp = ApiResponse::success(workflow, &clock)
        .with_link("self", &format!("/api/v1/workflows/{id}"))
        .with_link("execute", &format!("/api/v1/workflows/{id}/execute"));
    Ok((StatusCode::CREATED, Json(resp)))
}

/// GET /api/v1/workflows - List workflows, most recently updated first.
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<WorkflowListQuery>,
) -> Result<Json<ApiResponse<Vec<Workflow>>>, AppError> {
    let clock = RequestClock::start();

    let page = state
        .workflow_service
        .list(query.tag.as_deref(), query.page_request())
        .await?;

    Ok(Json(ApiResponse::page(page, &clock).with_link("self", "/api/v1/workflows")))
}

/// GET /api/v1/workflows/{id}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Workflow>>, AppError> {
    let clock = RequestClock::start();
    let workflow = state.workflow_service.get(&id).await?;

    let resp = ApiResponse::success(workflow, &clock)
        .with_link("self", &format!("/api/v1/workflows/{id}"))
        .with_link("executions", &format!("/api/v1/executions?workflow_id={id}"));
    Ok(Json(resp))
}

/// PUT /api/v1/workflows/{id} - Replace a definition and bump its version.
pub async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<Workflow>,
) -> Result<Json<ApiResponse<Workflow>>, AppError> {
    let clock = RequestClock::start();

    let mut candidate = body;
    candidate.id = id;
    state.check_webhook_paths(&candidate)?;

    let workflow = state.workflow_service.update(&id, candidate).await?;
    state.activate_triggers(&workflow).await?;

    Ok(Json(
        ApiResponse::success(workflow, &clock).with_link("self", &format!("/api/v1/workflows/{id}")),
    ))
}

/// DELETE /api/v1/workflows/{id} - Delete a workflow. Past executions stay.
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let clock = RequestClock::start();

    state.workflow_service.delete(&id).await?;
    state.deactivate_triggers(&id).await;

    Ok(Json(ApiResponse::success(
        serde_json::json!({ "deleted": true, "id": id }),
        &clock,
    )))
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// POST /api/v1/workflows/{id}/execute - Manual trigger.
///
/// Returns `202 Accepted` with the queued execution; progress is available
/// from the execution's event log.
pub async fn execute_workflow(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowExecution>>), AppError> {
    let clock = RequestClock::start();
    let request: ExecuteWorkflowRequest = optional_json(&body)?;

    let mut event = TriggerEvent::manual(id, request.variables);
    if let Some(user) = viewer.user {
        event = event.with_actor(user);
    }
    let execution = state.dispatcher.dispatch(event).await?;

    let execution_id = execution.id;
    let resp = execution_links(ApiResponse::success(execution, &clock), execution_id);
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

/// POST /api/v1/workflows/{id}/uploads/{variable_key}?file_name=... - File
/// upload trigger.
///
/// The raw request body is the file; `Content-Type` is its MIME type. The
/// bytes go to the blob store and the `file` variable receives their
/// metadata.
pub async fn upload_file(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((id, variable_key)): Path<(Uuid, String)>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowExecution>>), AppError> {
    let clock = RequestClock::start();

    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let storage_key = format!("uploads/{}", Uuid::now_v7());
    let size_bytes = body.len() as u64;

    state
        .uploads
        .put(&storage_key, body.to_vec(), &mime_type)
        .await
        .map_err(|e| AppError::Internal(format!("failed to store upload: {e}")))?;

    let event = TriggerEvent {
        workflow_id: id,
        kind: TriggerKind::FileUpload {
            variable_key,
            file: UploadedFile {
                file_name: query.file_name,
                mime_type,
                size_bytes,
                storage_key,
            },
        },
        actor: viewer.user,
        payload: None,
        variables: Map::new(),
    };
    let execution = state.dispatcher.dispatch(event).await?;

    let execution_id = execution.id;
    let resp = execution_links(ApiResponse::success(execution, &clock), execution_id);
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_means_no_variables() {
        let request: ExecuteWorkflowRequest = optional_json(&Bytes::from_static(b"  \n")).unwrap();
        assert!(request.variables.is_empty());
    }

    #[test]
    fn body_variables_are_read() {
        let request: ExecuteWorkflowRequest =
            optional_json(&Bytes::from_static(br#"{"variables":{"team":"ops"}}"#)).unwrap();
        assert_eq!(request.variables["team"], "ops");
    }

    #[test]
    fn malformed_body_is_bad_request() {
        let result: Result<ExecuteWorkflowRequest, _> = optional_json(&Bytes::from_static(b"{nope"));
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
