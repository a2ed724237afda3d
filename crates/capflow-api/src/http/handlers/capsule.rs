//! Capsule catalogue and test-run handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Map, Value};

use capflow_types::capsule::{CapsuleTestRunResult, CapsuleTypeMeta};

use crate::http::error::AppError;
use crate::http::extractors::query::CapsuleListQuery;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TestRunRequest {
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Slot payloads keyed by input slot ID; other keys become variables.
    #[serde(default)]
    pub input: Value,
}

/// GET /api/v1/capsules?category= - Capsule types, sorted by category then key.
pub async fn list_capsules(
    State(state): State<AppState>,
    Query(query): Query<CapsuleListQuery>,
) -> Result<Json<ApiResponse<Vec<CapsuleTypeMeta>>>, AppError> {
    let clock = RequestClock::start();
    let types = state.registry.list_types(query.category()?);
    Ok(Json(ApiResponse::success(types, &clock).with_link("self", "/api/v1/capsules")))
}

/// GET /api/v1/capsules/{type_key}
pub async fn get_capsule(
    State(state): State<AppState>,
    Path(type_key): Path<String>,
) -> Result<Json<ApiResponse<CapsuleTypeMeta>>, AppError> {
    let clock = RequestClock::start();
    let meta = state.registry.get_type(&type_key)?.clone();
    let resp = ApiResponse::success(meta, &clock)
        .with_link("test_run", &format!("/api/v1/capsules/{type_key}/test-run"));
    Ok(Json(resp))
}

/// POST /api/v1/capsules/{type_key}/test-run - Validate a config and run
/// the capsule once against mock input with simulated services.
///
/// Invalid configs are reported in the result (`status: invalid`), not as
/// an HTTP error.
pub async fn test_run_capsule(
    State(state): State<AppState>,
    Path(type_key): Path<String>,
    Json(body): Json<TestRunRequest>,
) -> Result<Json<ApiResponse<CapsuleTestRunResult>>, AppError> {
    let clock = RequestClock::start();
    let result = state.registry.test_run(&type_key, &body.config, &body.input).await?;
    Ok(Json(ApiResponse::success(result, &clock)))
}
