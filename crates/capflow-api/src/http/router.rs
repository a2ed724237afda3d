//! Axum router configuration with middleware.
//!
//! Management routes are under `/api/v1/`. Share views (`/s/...`), webhooks
//! (`/hooks/...`) and `/health` sit at the root.
//! Middleware: CORS, request tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers::{capsule, execution, share, webhook, workflow};
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Workflows
        .route(
            "/workflows",
            get(workflow::list_workflows).post(workflow::create_workflow),
        )
        .route(
            "/workflows/{id}",
            get(workflow::get_workflow)
                .put(workflow::update_workflow)
                .delete(workflow::delete_workflow),
        )
        .route("/workflows/{id}/execute", post(workflow::execute_workflow))
        .route(
            "/workflows/{id}/uploads/{variable_key}",
            post(workflow::upload_file),
        )
        // Executions
        .route("/executions", get(execution::list_executions))
        .route("/executions/{id}", get(execution::get_execution))
        .route("/executions/{id}/cancel", post(execution::cancel_execution))
        .route("/executions/{id}/resume", post(execution::resume_execution))
        .route(
            "/executions/{id}/nodes/{node_id}/logs",
            get(execution::node_logs),
        )
        .route("/executions/{id}/events", get(execution::list_events))
        .route("/executions/{id}/stream", get(execution::stream_events))
        // Sharing
        .route("/executions/{id}/share", post(share::create_share))
        .route("/shares", get(share::list_shares))
        .route("/shares/{id}/revoke", post(share::revoke_share))
        // Capsules
        .route("/capsules", get(capsule::list_capsules))
        .route("/capsules/{type_key}", get(capsule::get_capsule))
        .route(
            "/capsules/{type_key}/test-run",
            post(capsule::test_run_capsule),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/s/{token}", get(share::view_share))
        .route(
            "/s/{token}/artifacts/{artifact_id}",
            get(share::shared_artifact),
        )
        .route("/hooks/{*path}", post(webhook::receive_webhook))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness check.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app() -> (Router, AppState, TempDir) {
        let tmp = TempDir::new().unwrap();
        let state = AppState::init_at(tmp.path()).await.unwrap();
        (build_router(state.clone()), state, tmp)
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn greeting_workflow(webhook_path: &str) -> Value {
        json!({
            "name": "Greeting",
            "tags": ["demo"],
            "variables": [{"key": "team", "type": "string", "default_value": "everyone"}],
            "triggers": [
                {"trigger_id": "hook", "type": "webhook", "path": webhook_path}
            ],
            "nodes": [
                {"node_id": "start", "name": "Start", "type": "manual-trigger"},
                {"node_id": "greet", "name": "Greet", "type": "text-template",
                 "config": {"template": "Hello {{inputs.data.team}}"}}
            ],
            "edges": [{"source_node_id": "start", "source_slot_id": "payload",
                       "target_node_id": "greet", "target_slot_id": "data"}]
        })
    }

    async fn wait_terminal(router: &Router, execution_id: &str) -> Value {
        for _ in 0..100 {
            let (_, body) = call(router, get_req(&format!("/api/v1/executions/{execution_id}"))).await;
            let status = body["data"]["status"].as_str().unwrap_or_default().to_string();
            if ["completed", "failed", "cancelled"].contains(&status.as_str()) {
                return body["data"].clone();
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("execution {execution_id} did not finish");
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (router, _state, _tmp) = app().await;
        let (status, body) = call(&router, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_workflow_is_enveloped_404() {
        let (router, _state, _tmp) = app().await;
        let (status, body) = call(
            &router,
            get_req("/api/v1/workflows/01890000-0000-7000-8000-000000000000"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_NOT_FOUND");
    }

    #[tokio::test]
    async fn invalid_definition_is_rejected_with_details() {
        let (router, _state, _tmp) = app().await;
        let mut wf = greeting_workflow("broken");
        wf["edges"] = json!([]);
        wf["nodes"][1]["type"] = json!("no-such-capsule");
        let (status, body) = call(&router, post_json("/api/v1/workflows", wf)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!body["errors"][0]["details"]["definition_errors"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn execute_share_and_revoke() {
        let (router, _state, _tmp) = app().await;

        let (status, body) = call(&router, post_json("/api/v1/workflows", greeting_workflow("greet-a"))).await;
        assert_eq!(status, StatusCode::CREATED);
        let workflow_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &router,
            post_json(
                &format!("/api/v1/workflows/{workflow_id}/execute"),
                json!({"variables": {"team": "ops"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let execution_id = body["data"]["id"].as_str().unwrap().to_string();

        let execution = wait_terminal(&router, &execution_id).await;
        assert_eq!(execution["status"], "completed");

        let (_, events) = call(&router, get_req(&format!("/api/v1/executions/{execution_id}/events?after_seq=0"))).await;
        let seqs: Vec<u64> = events["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["seq"].as_u64().unwrap())
            .collect();
        assert!(!seqs.is_empty());
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        let last = *seqs.last().unwrap();
        let (_, newer) = call(
            &router,
            get_req(&format!("/api/v1/executions/{execution_id}/events?after_seq={last}")),
        )
        .await;
        assert!(newer["data"].as_array().unwrap().is_empty());

        let (status, logs) = call(
            &router,
            get_req(&format!("/api/v1/executions/{execution_id}/nodes/greet/logs")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(logs["data"].is_array());

        let (status, share) = call(
            &router,
            post_json(&format!("/api/v1/executions/{execution_id}/share"), json!({"title": "Greeting"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let token = share["data"]["link"]["token"].as_str().unwrap().to_string();
        let share_id = share["data"]["link"]["id"].as_str().unwrap().to_string();
        assert!(share["data"]["url"].as_str().unwrap().ends_with(&format!("/s/{token}")));

        let (status, body) = call(
            &router,
            post_json(
                &format!("/api/v1/executions/{execution_id}/share"),
                json!({"expires_in_days": u32::MAX}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "INVALID_EXPIRY");

        let (status, view) = call(&router, get_req(&format!("/s/{token}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["data"]["workflow_name"], "Greeting");
        let artifact_id = view["data"]["artifacts"][0]["artifact_id"].as_str().unwrap().to_string();

        let response = router
            .clone()
            .oneshot(get_req(&format!("/s/{token}/artifacts/{artifact_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"Hello ops");

        let (status, _) = call(&router, post_json(&format!("/api/v1/shares/{share_id}/revoke"), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&router, get_req(&format!("/s/{token}"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["errors"][0]["code"], "ACCESS_DENIED");

        let (status, _) = call(&router, get_req("/s/not-a-token")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhook_binds_payload_and_checks_paths() {
        let (router, _state, _tmp) = app().await;
        let (status, _) = call(&router, post_json("/api/v1/workflows", greeting_workflow("greet-b"))).await;
        assert_eq!(status, StatusCode::CREATED);

        // A second workflow cannot claim the same path.
        let (status, body) = call(&router, post_json("/api/v1/workflows", greeting_workflow("/greet-b/"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], "WEBHOOK_PATH_TAKEN");

        let (status, body) = call(&router, post_json("/hooks/greet-b", json!({"team": "sre"}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["trigger_type"], "webhook");
        let execution_id = body["data"]["id"].as_str().unwrap().to_string();
        let execution = wait_terminal(&router, &execution_id).await;
        assert_eq!(execution["status"], "completed");
        assert_eq!(execution["variables"]["team"], "sre");

        let (status, _) = call(&router, post_json("/hooks/unknown", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn signed_webhook_requires_valid_signature() {
        let (router, _state, _tmp) = app().await;
        unsafe { std::env::set_var("CAPFLOW_SECRET_ROUTER_TEST_HOOK_KEY", "hook-secret") };

        let mut wf = greeting_workflow("signed");
        wf["triggers"][0]["secret_name"] = json!("router-test-hook-key");
        let (status, _) = call(&router, post_json("/api/v1/workflows", wf)).await;
        assert_eq!(status, StatusCode::CREATED);

        let body = json!({"team": "payments"}).to_string();
        let (status, _) = call(&router, post_json("/hooks/signed", serde_json::from_str(&body).unwrap())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let signature = capflow_infra::webhook::sign(b"hook-secret", body.as_bytes()).unwrap();
        let request = Request::post("/hooks/signed")
            .header("content-type", "application/json")
            .header("x-signature", format!("sha256={signature}"))
            .body(Body::from(body))
            .unwrap();
        let (status, _) = call(&router, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn capsule_catalogue_and_test_run() {
        let (router, _state, _tmp) = app().await;

        let (status, body) = call(&router, get_req("/api/v1/capsules?category=trigger")).await;
        assert_eq!(status, StatusCode::OK);
        let types = body["data"].as_array().unwrap();
        assert!(types.iter().all(|t| t["category"] == "trigger"));

        let (status, _) = call(&router, get_req("/api/v1/capsules?category=sink")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &router,
            post_json(
                "/api/v1/capsules/text-template/test-run",
                json!({"config": {"template": "Hi {{vars.name}}"}, "input": {"name": "Ada"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "success");

        let (status, body) = call(
            &router,
            post_json("/api/v1/capsules/text-template/test-run", json!({"config": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "invalid");

        let (status, _) = call(&router, get_req("/api/v1/capsules/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_finished_execution_conflicts_and_resume_runs_again() {
        let (router, _state, _tmp) = app().await;
        let (_, body) = call(&router, post_json("/api/v1/workflows", greeting_workflow("greet-c"))).await;
        let workflow_id = body["data"]["id"].as_str().unwrap().to_string();
        let (_, body) = call(
            &router,
            post_json(&format!("/api/v1/workflows/{workflow_id}/execute"), json!({})),
        )
        .await;
        let execution_id = body["data"]["id"].as_str().unwrap().to_string();
        wait_terminal(&router, &execution_id).await;

        // The run is released just after its final state is stored.
        let mut attempt = 0;
        let (status, body) = loop {
            let (status, body) = call(
                &router,
                post_json(&format!("/api/v1/executions/{execution_id}/cancel"), json!({})),
            )
            .await;
            attempt += 1;
            if status == StatusCode::CONFLICT || attempt == 20 {
                break (status, body);
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        };
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], "ALREADY_TERMINAL");

        let (status, body) = call(
            &router,
            post_json(&format!("/api/v1/executions/{execution_id}/resume"), json!({"node_id": "greet"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let resumed_id = body["data"]["id"].as_str().unwrap().to_string();
        assert_ne!(resumed_id, execution_id);
        let resumed = wait_terminal(&router, &resumed_id).await;
        assert_eq!(resumed["status"], "completed");
        assert_eq!(resumed["resumed_from"]["execution_id"], execution_id.as_str());

        let (_, list) = call(&router, get_req(&format!("/api/v1/executions?workflow_id={workflow_id}"))).await;
        assert_eq!(list["meta"]["pagination"]["total"], 2);
    }
}
