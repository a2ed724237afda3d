//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST API.
//! Core services are generic over repository traits; AppState pins them to
//! the SQLite implementations from capflow-infra.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use capflow_core::artifact::{ArtifactResolver, BoxBlobStore};
use capflow_core::capsule::{CapsuleRegistry, CapsuleServices, builtin_registry};
use capflow_core::engine::{ExecutionEngine, SecretResolver};
use capflow_core::repository::workflow::WorkflowRepository;
use capflow_core::share::ShareLinkService;
use capflow_core::trigger::{
    TimerCallback, TimerFire, TimerScheduler, TriggerDispatcher, TriggerError, TriggerEvent,
};
use capflow_core::trigger::dispatcher::normalize_webhook_path;
use capflow_core::workflow::WorkflowService;
use capflow_infra::config::{blob_dir, load_config, resolve_data_dir};
use capflow_infra::secret::EnvSecretResolver;
use capflow_infra::services::LiveCapsuleServices;
use capflow_infra::sqlite::{
    DatabasePool, SqliteExecutionRepository, SqliteShareLinkRepository, SqliteWorkflowRepository,
    database_url,
};
use capflow_infra::storage::FsBlobStore;
use capflow_types::config::CapflowConfig;
use capflow_types::workflow::{TriggerConfig, Workflow};
use futures_util::future::BoxFuture;
use uuid::Uuid;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteWorkflowService = WorkflowService<SqliteWorkflowRepository>;

pub type ConcreteEngine = ExecutionEngine<SqliteExecutionRepository>;

pub type ConcreteDispatcher = TriggerDispatcher<SqliteWorkflowRepository, SqliteExecutionRepository>;

pub type ConcreteShareService = ShareLinkService<SqliteShareLinkRepository, SqliteExecutionRepository>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CapflowConfig>,
    pub registry: Arc<CapsuleRegistry>,
    pub workflow_service: Arc<ConcreteWorkflowService>,
    pub engine: ConcreteEngine,
    pub dispatcher: Arc<ConcreteDispatcher>,
    pub share_service: Arc<ConcreteShareService>,
    pub scheduler: Arc<TimerScheduler>,
    pub secrets: Arc<dyn SecretResolver>,
    /// Blob store for uploaded trigger files (same store as artifacts).
    pub uploads: BoxBlobStore,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state in the resolved data directory.
    pub async fn init() -> anyhow::Result<Self> {
        Self::init_at(&resolve_data_dir()).await
    }

    /// Connect to `{data_dir}/capflow.db`, load `config.toml` and wire services.
    ///
    /// Interrupted executions from a previous process are settled and
    /// webhook routes are loaded. Timers only start with [`AppState::start_timers`].
    pub async fn init_at(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let config = load_config(data_dir).await;

        let db_pool = DatabasePool::new(&database_url(data_dir)).await?;

        let registry = builtin_registry();
        let uploads = BoxBlobStore::new(FsBlobStore::new(blob_dir(data_dir)));
        let resolver = ArtifactResolver::new(uploads.clone(), config.artifacts.inline_threshold_bytes);
        let services: Arc<dyn CapsuleServices> = Arc::new(LiveCapsuleServices::from_settings(config.llm.clone())?);
        let secrets: Arc<dyn SecretResolver> = Arc::new(EnvSecretResolver::new());

        let engine = ExecutionEngine::new(
            SqliteExecutionRepository::new(db_pool.clone()),
            Arc::clone(&registry),
            resolver,
            services,
            config.engine.clone(),
        )
        .with_secret_resolver(Arc::clone(&secrets));

        let recovered = engine.recover_interrupted().await?;
        if recovered > 0 {
            tracing::info!(recovered, "settled executions interrupted by the previous process");
        }

        let workflow_service = Arc::new(WorkflowService::new(
            SqliteWorkflowRepository::new(db_pool.clone()),
            Arc::clone(&registry),
        ));

        let dispatcher = Arc::new(TriggerDispatcher::new(
            Arc::new(SqliteWorkflowRepository::new(db_pool.clone())),
            engine.clone(),
        ));
        let routes = dispatcher.load_routes().await?;
        tracing::debug!(routes, "webhook routes loaded");

        let share_service = Arc::new(ShareLinkService::new(
            SqliteShareLinkRepository::new(db_pool.clone()),
            engine.clone(),
            config.share.clone(),
        ));

        let scheduler = Arc::new(TimerScheduler::new(timer_callback(Arc::clone(&dispatcher))));

        Ok(Self {
            config: Arc::new(config),
            registry,
            workflow_service,
            engine,
            dispatcher,
            share_service,
            scheduler,
            secrets,
            uploads,
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Start the timer scheduler and schedule every stored workflow.
    pub async fn start_timers(&self) -> anyhow::Result<usize> {
        self.scheduler.start().await;
        let mut jobs = 0;
        for workflow in self.workflow_service.repository().list_all().await? {
            match self.scheduler.schedule_workflow(&workflow).await {
                Ok(n) => jobs += n,
                Err(e) => tracing::warn!(workflow_id = %workflow.id, error = %e, "skipping timers"),
            }
        }
        Ok(jobs)
    }

    /// Fail when an enabled webhook trigger of `workflow` uses a path owned
    /// by another workflow. Run before storing so a conflict changes nothing.
    pub fn check_webhook_paths(&self, workflow: &Workflow) -> Result<(), TriggerError> {
        for trigger in workflow.triggers.iter().filter(|t| t.enabled) {
            let TriggerConfig::Webhook { path, .. } = &trigger.config else {
                continue;
            };
            if let Some(route) = self.dispatcher.webhook_route(path) {
                if route.workflow_id != workflow.id {
                    return Err(TriggerError::WebhookPathTaken {
                        path: normalize_webhook_path(path),
                        workflow_id: route.workflow_id,
                    });
                }
            }
        }
        Ok(())
    }

    /// Make a stored or updated workflow's triggers live.
    ///
    /// Webhook conflicts are returned; timer registration is skipped while
    /// the scheduler is stopped (CLI use).
    pub async fn activate_triggers(&self, workflow: &Workflow) -> Result<(), TriggerError> {
        self.dispatcher.register_workflow(workflow)?;
        if let Err(e) = self.scheduler.schedule_workflow(workflow).await {
            tracing::debug!(workflow_id = %workflow.id, error = %e, "timers not scheduled");
        }
        Ok(())
    }

    /// Remove a deleted workflow's webhook routes and timers.
    pub async fn deactivate_triggers(&self, workflow_id: &Uuid) {
        self.dispatcher.unregister_workflow(workflow_id);
        if let Err(e) = self.scheduler.unschedule_workflow(workflow_id).await {
            tracing::debug!(%workflow_id, error = %e, "no timers to unschedule");
        }
    }
}

/// Every timer fire becomes a timer trigger event on the dispatcher.
fn timer_callback(dispatcher: Arc<ConcreteDispatcher>) -> TimerCallback {
    Arc::new(move |fire: TimerFire| -> BoxFuture<'static, ()> {
        let dispatcher = Arc::clone(&dispatcher);
        Box::pin(async move {
            let event = TriggerEvent::timer(fire.workflow_id, fire.trigger_id.clone(), fire.fired_at);
            if let Err(e) = dispatcher.dispatch(event).await {
                tracing::warn!(
                    workflow_id = %fire.workflow_id,
                    trigger_id = %fire.trigger_id,
                    error = %e,
                    "timer dispatch failed"
                );
            }
        })
    })
}
