//! Trigger dispatch: external events in, execution requests out.
//!
//! - `dispatcher` -- `TriggerDispatcher`: trigger matching, webhook routes,
//!   variable offering
//! - `scheduler` -- `TimerScheduler`: one sleeping task per timer trigger
//! - `schedule` -- cron normalization, timezones and fire-time arithmetic

pub mod dispatcher;
pub mod schedule;
pub mod scheduler;

use capflow_types::error::RepositoryError;
use capflow_types::workflow::TriggerType;
use uuid::Uuid;

use crate::engine::EngineError;

pub use dispatcher::{TriggerDispatcher, TriggerEvent, TriggerKind, UploadedFile, WebhookRoute};
pub use scheduler::{SchedulerError, TimerCallback, TimerFire, TimerScheduler};

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("workflow {workflow_id} has no enabled {} trigger matching this event", trigger_type.as_str())]
    NoMatchingTrigger {
        workflow_id: Uuid,
        trigger_type: TriggerType,
    },

    #[error("no webhook registered at path '{0}'")]
    WebhookNotFound(String),

    #[error("webhook path '{path}' is already used by workflow {workflow_id}")]
    WebhookPathTaken { path: String, workflow_id: Uuid },

    #[error("upload rejected: {0}")]
    RejectedUpload(String),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
