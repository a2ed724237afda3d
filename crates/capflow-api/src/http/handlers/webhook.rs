//! Webhook receiver handler.
//!
//! Looks up the workflow registered at the path, verifies the optional
//! HMAC-SHA256 signature, and dispatches a webhook trigger event. The
//! response is sent once the execution is queued, not when it finishes.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde_json::Value;

use capflow_core::trigger::TriggerError;
use capflow_core::trigger::dispatcher::normalize_webhook_path;
use capflow_infra::webhook::{SIGNATURE_HEADER, authenticate};
use capflow_types::execution::WorkflowExecution;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

/// Webhook bodies that are not JSON are passed on as a string.
fn parse_payload(body: &Bytes) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice(body) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(String::from_utf8_lossy(body).into_owned())),
    }
}

/// POST /hooks/{*path}
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowExecution>>), AppError> {
    let clock = RequestClock::start();
    let path = normalize_webhook_path(&path);

    let route = state
        .dispatcher
        .webhook_route(&path)
        .ok_or_else(|| TriggerError::WebhookNotFound(path.clone()))?;

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = authenticate(state.secrets.as_ref(), route.secret_name.as_deref(), &body, signature).await {
        tracing::warn!(webhook_path = %path, workflow_id = %route.workflow_id, error = %e, "webhook rejected");
        return Err(e.into());
    }

    let execution = state.dispatcher.dispatch_webhook(&path, parse_payload(&body)).await?;
    tracing::info!(
        webhook_path = %path,
        workflow_id = %execution.workflow_id,
        execution_id = %execution.id,
        "webhook accepted"
    );

    let id = execution.id;
    let resp = ApiResponse::success(execution, &clock).with_link("execution", &format!("/api/v1/executions/{id}"));
    Ok((StatusCode::ACCEPTED, Json(resp)))
}
