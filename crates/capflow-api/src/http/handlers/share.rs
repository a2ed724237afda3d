//! Share link handlers.
//!
//! Management endpoints live under `/api/v1`; the public view is served at
//! `/s/{token}` so that share URLs are `{base_url}/s/{token}`.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use capflow_core::share::{CreateShareLink, SharedView};
use capflow_types::artifact::ArtifactContent;
use capflow_types::share::{AccessLevel, ShareLink};

use crate::http::error::AppError;
use crate::http::extractors::viewer::Viewer;
use crate::http::handlers::workflow::optional_json;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateShareRequest {
    /// `public` (default) or `authenticated`.
    #[serde(default)]
    pub access_level: Option<AccessLevel>,
    /// Omitted: configured default. `0`: never expires.
    #[serde(default)]
    pub expires_in_days: Option<u32>,
    /// Omitted: the execution's final artifacts.
    #[serde(default)]
    pub artifact_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedShare {
    pub link: ShareLink,
    pub url: String,
}

/// POST /api/v1/executions/{id}/share - Publish a finished execution's artifacts.
pub async fn create_share(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(execution_id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<CreatedShare>>), AppError> {
    let clock = RequestClock::start();
    let request: CreateShareRequest = optional_json(&body)?;

    let mut create = CreateShareLink::new(execution_id, request.access_level.unwrap_or(AccessLevel::Public));
    create.expires_in_days = request.expires_in_days;
    create.artifact_ids = request.artifact_ids;
    create.title = request.title;
    create.created_by = viewer.user;

    let (link, url) = state.share_service.create(create).await?;
    let resp = ApiResponse::success(CreatedShare { link, url: url.clone() }, &clock).with_link("share", &url);
    Ok((StatusCode::CREATED, Json(resp)))
}

/// GET /api/v1/shares - All share links, newest first.
pub async fn list_shares(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<ShareLink>>>, AppError> {
    let clock = RequestClock::start();
    let links = state.share_service.list().await?;
    Ok(Json(ApiResponse::success(links, &clock)))
}

/// POST /api/v1/shares/{id}/revoke - Revoke a link. Idempotent.
pub async fn revoke_share(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ShareLink>>, AppError> {
    let clock = RequestClock::start();
    let link = state.share_service.revoke(&id).await?;
    Ok(Json(ApiResponse::success(link, &clock)))
}

/// GET /s/{token} - Public view of a shared execution. Counts as a view.
pub async fn view_share(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<SharedView>>, AppError> {
    let clock = RequestClock::start();
    let view = state.share_service.resolve(&token, viewer.is_authenticated()).await?;

    let mut resp = ApiResponse::success(view, &clock);
    let artifact_ids: Vec<Uuid> = resp
        .data
        .as_ref()
        .map(|v| v.artifacts.iter().map(|a| a.artifact_id).collect())
        .unwrap_or_default();
    for artifact_id in artifact_ids {
        resp = resp.with_link(
            &format!("artifact:{artifact_id}"),
            &format!("/s/{token}/artifacts/{artifact_id}"),
        );
    }
    Ok(Json(resp))
}

/// GET /s/{token}/artifacts/{artifact_id} - Raw payload of one shared artifact.
pub async fn shared_artifact(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((token, artifact_id)): Path<(String, Uuid)>,
) -> Result<Response, AppError> {
    let (artifact, content) = state
        .share_service
        .artifact_content(&token, &artifact_id, viewer.is_authenticated())
        .await?;

    let bytes = match content {
        ArtifactContent::Bytes(bytes) => bytes,
        ArtifactContent::Json(serde_json::Value::String(text)) => text.into_bytes(),
        ArtifactContent::Json(value) => serde_json::to_vec(&value)
            .map_err(|e| AppError::Internal(format!("failed to encode artifact: {e}")))?,
    };

    let disposition = format!("inline; filename=\"{}\"", artifact.name.replace('"', "'"));
    Ok((
        [
            (header::CONTENT_TYPE, artifact.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_defaults() {
        let request: CreateShareRequest = optional_json(&Bytes::new()).unwrap();
        assert!(request.access_level.is_none());
        assert!(request.expires_in_days.is_none());
        assert!(request.artifact_ids.is_none());
    }

    #[test]
    fn create_request_reads_fields() {
        let request: CreateShareRequest = optional_json(&Bytes::from_static(
            br#"{"access_level":"authenticated","expires_in_days":0,"title":"Q3 report"}"#,
        ))
        .unwrap();
        assert_eq!(request.access_level, Some(AccessLevel::Authenticated));
        assert_eq!(request.expires_in_days, Some(0));
        assert_eq!(request.title.as_deref(), Some("Q3 report"));
    }
}
