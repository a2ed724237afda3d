//! Execution inspection and control handlers.
//!
//! `GET /executions/{id}/events?after_seq=N` returns the durable events a
//! client has not seen; `/stream` replays the same backlog and then follows
//! live events over SSE until the execution finishes.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use capflow_types::event::{ExecutionEvent, ExecutionEventKind};
use capflow_types::execution::{NodeLogEntry, WorkflowExecution};

use crate::http::error::AppError;
use crate::http::extractors::query::{EventsQuery, ExecutionListQuery};
use crate::http::handlers::workflow::optional_json;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ResumeRequest {
    /// Node to re-run; it and everything downstream of it run again.
    pub node_id: String,
}

/// GET /api/v1/executions - List executions, newest first.
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionListQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowExecution>>>, AppError> {
    let clock = RequestClock::start();
    let page = state.engine.list(&query.filter()?, query.page_request()).await?;
    Ok(Json(ApiResponse::page(page, &clock).with_link("self", "/api/v1/executions")))
}

/// GET /api/v1/executions/{id}
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowExecution>>, AppError> {
    let clock = RequestClock::start();
    let execution = state.engine.get(&id).await?;
    let workflow_id = execution.workflow_id;

    let resp = ApiResponse::success(execution, &clock)
        .with_link("self", &format!("/api/v1/executions/{id}"))
        .with_link("workflow", &format!("/api/v1/workflows/{workflow_id}"))
        .with_link("events", &format!("/api/v1/executions/{id}/events"));
    Ok(Json(resp))
}

/// POST /api/v1/executions/{id}/cancel
///
/// Nodes already running finish their current attempt; nothing new starts.
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowExecution>>), AppError> {
    let clock = RequestClock::start();
    state.engine.cancel(&id).await?;
    let execution = state.engine.get(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(execution, &clock))))
}

/// POST /api/v1/executions/{id}/resume - Re-run from a node.
///
/// Creates a new execution; the original record is left untouched.
pub async fn resume_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowExecution>>), AppError> {
    let clock = RequestClock::start();
    let request: ResumeRequest = optional_json(&body)?;
    if request.node_id.trim().is_empty() {
        return Err(AppError::BadRequest("node_id is required".to_string()));
    }

    let execution = state.engine.resume_from_node(&id, &request.node_id).await?;
    let new_id = execution.id;
    let resp = ApiResponse::success(execution, &clock)
        .with_link("self", &format!("/api/v1/executions/{new_id}"))
        .with_link("resumed_from", &format!("/api/v1/executions/{id}"));
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

/// GET /api/v1/executions/{id}/nodes/{node_id}/logs
pub async fn node_logs(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(Uuid, String)>,
) -> Result<Json<ApiResponse<Vec<NodeLogEntry>>>, AppError> {
    let clock = RequestClock::start();
    let logs = state.engine.node_logs(&id, &node_id).await?;
    Ok(Json(ApiResponse::success(logs, &clock)))
}

/// GET /api/v1/executions/{id}/events?after_seq=N
pub async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<ApiResponse<Vec<ExecutionEvent>>>, AppError> {
    let clock = RequestClock::start();
    let events = state.engine.events_since(&id, query.after_seq).await?;
    Ok(Json(ApiResponse::success(events, &clock)))
}

/// GET /api/v1/executions/{id}/stream?after_seq=N - SSE event stream.
///
/// Each SSE event is named after the event type and carries the event JSON;
/// its SSE id is the `seq`, so a client can reconnect with the last id it saw.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Subscribe, then read status, then the backlog: an execution that was
    // already terminal has its final event in the backlog.
    let mut live = state.engine.subscribe();
    let already_finished = state.engine.get(&id).await?.status.is_terminal();
    let backlog = state.engine.events_since(&id, query.after_seq).await?;

    let sse_stream = async_stream::stream! {
        let mut last_seq = query.after_seq;
        let mut finished = false;

        for event in backlog {
            last_seq = event.seq;
            finished |= matches!(event.kind, ExecutionEventKind::ExecutionFinished { .. });
            yield Ok::<_, Infallible>(sse_event(&event));
        }

        if !finished && !already_finished {
            loop {
                match live.recv().await {
                    Ok(event) if event.execution_id == id && event.seq > last_seq => {
                        last_seq = event.seq;
                        let done = matches!(event.kind, ExecutionEventKind::ExecutionFinished { .. });
                        yield Ok(sse_event(&event));
                        if done {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(execution_id = %id, skipped, "event stream lagged");
                        let data = serde_json::json!({ "skipped": skipped, "last_seq": last_seq });
                        yield Ok(Event::default().event("lagged").data(data.to_string()));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }

        yield Ok(Event::default().event("done").data("{}"));
    };

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn sse_event(event: &ExecutionEvent) -> Event {
    let name = serde_json::to_value(&event.kind)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str().map(str::to_string)))
        .unwrap_or_else(|| "event".to_string());
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().id(event.seq.to_string()).event(name).data(data)
}
