//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use capflow_core::capsule::CapsuleError;
use capflow_core::engine::{EngineError, VariableError};
use capflow_core::share::ShareError;
use capflow_core::trigger::TriggerError;
use capflow_core::workflow::{ValidationErrors, WorkflowServiceError};
use capflow_infra::webhook::WebhookError;
use capflow_types::error::RepositoryError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Workflow(WorkflowServiceError),
    Engine(EngineError),
    Trigger(TriggerError),
    Share(ShareError),
    Capsule(CapsuleError),
    Webhook(WebhookError),
    /// Malformed request (bad query value, unparsable body).
    BadRequest(String),
    Internal(String),
}

impl From<WorkflowServiceError> for AppError {
    fn from(e: WorkflowServiceError) -> Self {
        AppError::Workflow(e)
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl From<TriggerError> for AppError {
    fn from(e: TriggerError) -> Self {
        match e {
            TriggerError::Engine(inner) => AppError::Engine(inner),
            other => AppError::Trigger(other),
        }
    }
}

impl From<ShareError> for AppError {
    fn from(e: ShareError) -> Self {
        AppError::Share(e)
    }
}

impl From<CapsuleError> for AppError {
    fn from(e: CapsuleError) -> Self {
        AppError::Capsule(e)
    }
}

impl From<WebhookError> for AppError {
    fn from(e: WebhookError) -> Self {
        AppError::Webhook(e)
    }
}

fn validation_details(errors: &ValidationErrors) -> serde_json::Value {
    json!({ "definition_errors": errors.errors() })
}

fn repository_status(e: &RepositoryError) -> (StatusCode, &'static str) {
    match e {
        RepositoryError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        RepositoryError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        RepositoryError::Connection | RepositoryError::Query(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
        }
    }
}

impl AppError {
    /// Status, machine code and optional details for the envelope.
    fn parts(&self) -> (StatusCode, &'static str, Option<serde_json::Value>) {
        match self {
            AppError::Workflow(e) => match e {
                WorkflowServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND", None),
                WorkflowServiceError::AlreadyExists(_) => (StatusCode::CONFLICT, "WORKFLOW_EXISTS", None),
                WorkflowServiceError::EmptyName => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", None),
                WorkflowServiceError::Invalid(errors) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "INVALID_DEFINITION",
                    Some(validation_details(errors)),
                ),
                WorkflowServiceError::Repository(e) => {
                    let (status, code) = repository_status(e);
                    (status, code, None)
                }
            },
            AppError::Engine(e) => match e {
                EngineError::Invalid(errors) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "INVALID_DEFINITION",
                    Some(validation_details(errors)),
                ),
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "EXECUTION_NOT_FOUND", None),
                EngineError::NotResumable { .. } => (StatusCode::CONFLICT, "NOT_RESUMABLE", None),
                EngineError::UnknownNode { .. } => (StatusCode::NOT_FOUND, "NODE_NOT_FOUND", None),
                EngineError::AlreadyTerminal { .. } => (StatusCode::CONFLICT, "ALREADY_TERMINAL", None),
                EngineError::Variable(VariableError::SecretUnavailable { .. }) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "SECRET_UNAVAILABLE", None)
                }
                EngineError::Variable(_) => (StatusCode::BAD_REQUEST, "VARIABLE_ERROR", None),
                EngineError::Repository(e) => {
                    let (status, code) = repository_status(e);
                    (status, code, None)
                }
                EngineError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
            },
            AppError::Trigger(e) => match e {
                TriggerError::WorkflowNotFound(_) => (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND", None),
                TriggerError::NoMatchingTrigger { .. } => (StatusCode::CONFLICT, "NO_MATCHING_TRIGGER", None),
                TriggerError::WebhookNotFound(_) => (StatusCode::NOT_FOUND, "WEBHOOK_NOT_FOUND", None),
                TriggerError::WebhookPathTaken { .. } => (StatusCode::CONFLICT, "WEBHOOK_PATH_TAKEN", None),
                TriggerError::RejectedUpload(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UPLOAD_REJECTED", None),
                TriggerError::Repository(e) => {
                    let (status, code) = repository_status(e);
                    (status, code, None)
                }
                TriggerError::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR", None),
            },
            AppError::Share(e) => match e {
                ShareError::NotFound => (StatusCode::NOT_FOUND, "SHARE_NOT_FOUND", None),
                ShareError::AccessDenied(_) => (StatusCode::FORBIDDEN, "ACCESS_DENIED", None),
                ShareError::ExecutionNotFound(_) => (StatusCode::NOT_FOUND, "EXECUTION_NOT_FOUND", None),
                ShareError::NotShareable(_) => (StatusCode::CONFLICT, "NOT_SHAREABLE", None),
                ShareError::InvalidExpiry(_) => (StatusCode::BAD_REQUEST, "INVALID_EXPIRY", None),
                ShareError::UnknownArtifact(_) => (StatusCode::NOT_FOUND, "ARTIFACT_NOT_FOUND", None),
                ShareError::Artifact(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ARTIFACT_ERROR", None),
                ShareError::Repository(e) => {
                    let (status, code) = repository_status(e);
                    (status, code, None)
                }
            },
            AppError::Capsule(CapsuleError::UnknownType(_)) => {
                (StatusCode::NOT_FOUND, "CAPSULE_TYPE_NOT_FOUND", None)
            }
            AppError::Webhook(e) => match e {
                WebhookError::MissingSignature | WebhookError::InvalidSignature => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", None)
                }
                WebhookError::InvalidKey(_) | WebhookError::SecretUnavailable(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "WEBHOOK_MISCONFIGURED", None)
                }
            },
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Workflow(e) => e.to_string(),
            AppError::Engine(e) => e.to_string(),
            AppError::Trigger(e) => e.to_string(),
            AppError::Share(e) => e.to_string(),
            AppError::Capsule(e) => e.to_string(),
            AppError::Webhook(e) => e.to_string(),
            AppError::BadRequest(msg) | AppError::Internal(msg) => msg.clone(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.parts().0
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, details) = self.parts();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        } else {
            tracing::debug!(code, error = %message, "request rejected");
        }

        (status, Json(ApiResponse::error(code, message, details))).into_response()
    }
}
