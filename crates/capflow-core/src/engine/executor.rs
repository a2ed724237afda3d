//! Execution engine: dependency-driven parallel DAG execution with durable,
//! seq-numbered progress.
//!
//! # Execution flow
//!
//! 1. `submit` validates the workflow, binds variables, freezes the snapshot
//!    and persists a `queued` execution with one `pending` record per node.
//! 2. A coordinator task takes ownership of the execution and loops:
//!    skip nodes that can never run, launch ready nodes in declaration order
//!    up to the concurrency limit, then wait for node progress.
//! 3. Node tasks run in a `JoinSet` and report over an mpsc channel; only
//!    the coordinator mutates records, and every change goes through the
//!    `ExecutionRecorder`.
//! 4. Once nothing runs and nothing can start, the execution settles to
//!    `completed`, `failed` or `cancelled`.
//!
//! Resume builds a new execution from a finished one's frozen snapshot and
//! re-enters the same loop with only the target's forward closure pending.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use capflow_types::config::EngineSettings;
use capflow_types::event::{ExecutionEvent, ExecutionEventKind};
use capflow_types::execution::{
    ExecutionStatus, LogLevel, NodeExecution, NodeLogEntry, NodeStatus, ResumeOrigin,
    WorkflowExecution,
};
use capflow_types::workflow::{TriggerType, Workflow};
use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::node::{NodeOutcome, NodeProgress, NodeReport, NodeTask};
use super::plan::{ExecutionPlan, InputSource, Readiness};
use super::recorder::ExecutionRecorder;
use super::variables::{SecretResolver, bind_variables, resolve_secrets};
use super::{EngineError, ExecutionRequest};
use crate::artifact::ArtifactResolver;
use crate::capsule::{CapsuleRegistry, CapsuleServices};
use crate::event::bus::EventBus;
use crate::repository::execution::{ExecutionFilter, ExecutionRepository};
use crate::repository::{Page, PageRequest};
use crate::workflow::dag::NodeGraph;
use crate::workflow::{ValidationErrors, fill_defaults, validate_workflow};

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Runs workflows and tracks their executions.
///
/// Generic over `R: ExecutionRepository` for storage flexibility. Cloning is
/// cheap and every clone drives the same set of executions.
pub struct ExecutionEngine<R: ExecutionRepository> {
    repo: Arc<R>,
    registry: Arc<CapsuleRegistry>,
    resolver: ArtifactResolver,
    services: Arc<dyn CapsuleServices>,
    secrets: Option<Arc<dyn SecretResolver>>,
    events: EventBus,
    settings: EngineSettings,
    /// Engine-wide limit on concurrently running attempts.
    permits: Arc<Semaphore>,
    /// Cancellation tokens of executions driven by this process.
    running: Arc<DashMap<Uuid, CancellationToken>>,
}

impl<R: ExecutionRepository> Clone for ExecutionEngine<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            registry: Arc::clone(&self.registry),
            resolver: self.resolver.clone(),
            services: Arc::clone(&self.services),
            secrets: self.secrets.clone(),
            events: self.events.clone(),
            settings: self.settings.clone(),
            permits: Arc::clone(&self.permits),
            running: Arc::clone(&self.running),
        }
    }
}

impl<R: ExecutionRepository + 'static> ExecutionEngine<R> {
    pub fn new(
        repo: R,
        registry: Arc<CapsuleRegistry>,
        resolver: ArtifactResolver,
        services: Arc<dyn CapsuleServices>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            repo: Arc::new(repo),
            registry,
            resolver,
            services,
            secrets: None,
            events: EventBus::new(settings.event_channel_capacity),
            permits: Arc::new(Semaphore::new(settings.global_max_concurrency.max(1))),
            settings,
            running: Arc::new(DashMap::new()),
        }
    }

    /// Resolve secret variables through `secrets`.
    pub fn with_secret_resolver(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Publish progress on an existing bus instead of a private one.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn registry(&self) -> &Arc<CapsuleRegistry> {
        &self.registry
    }

    pub fn artifact_resolver(&self) -> &ArtifactResolver {
        &self.resolver
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Starting executions
    // -----------------------------------------------------------------------

    /// Start a run and return its `queued` record without waiting.
    pub async fn submit(
        &self,
        workflow: &Workflow,
        request: ExecutionRequest,
    ) -> Result<WorkflowExecution, EngineError> {
        let (execution, _detached) = self.start(workflow, request).await?;
        Ok(execution)
    }

    /// Start a run and wait for its terminal record.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        request: ExecutionRequest,
    ) -> Result<WorkflowExecution, EngineError> {
        let (_, handle) = self.start(workflow, request).await?;
        join(handle).await
    }

    /// Re-run a finished execution from `node_id`.
    ///
    /// Returns the new execution's `queued` record. Nodes outside the
    /// target's forward closure keep their prior records and outputs.
    pub async fn resume_from_node(
        &self,
        execution_id: &Uuid,
        node_id: &str,
    ) -> Result<WorkflowExecution, EngineError> {
        let (execution, _detached) = self.start_resume(execution_id, node_id).await?;
        Ok(execution)
    }

    /// Like `resume_from_node`, waiting for the terminal record.
    pub async fn resume_and_wait(
        &self,
        execution_id: &Uuid,
        node_id: &str,
    ) -> Result<WorkflowExecution, EngineError> {
        let (_, handle) = self.start_resume(execution_id, node_id).await?;
        join(handle).await
    }

    async fn start(
        &self,
        workflow: &Workflow,
        request: ExecutionRequest,
    ) -> Result<(WorkflowExecution, JoinHandle<WorkflowExecution>), EngineError> {
        let mut workflow = workflow.clone();
        fill_defaults(&mut workflow, &self.registry);
        validate_workflow(&workflow, &self.registry).map_err(ValidationErrors)?;

        let variables = bind_variables(&workflow.variables, &request.variables)?;
        let secrets = resolve_secrets(&workflow.variables, &variables, self.secrets.as_deref()).await?;

        let snapshot = workflow.snapshot();
        let node_executions = snapshot.nodes.iter().map(NodeExecution::pending).collect();
        let execution = WorkflowExecution {
            id: Uuid::now_v7(),
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            workflow_version: workflow.version,
            snapshot,
            trigger_type: request.trigger_type,
            triggered_by: request.triggered_by,
            status: ExecutionStatus::Queued,
            variables,
            node_executions,
            final_artifacts: Vec::new(),
            share_link_ids: Vec::new(),
            last_seq: 0,
            error_message: None,
            resumed_from: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.launch(execution, secrets).await
    }

    async fn start_resume(
        &self,
        execution_id: &Uuid,
        node_id: &str,
    ) -> Result<(WorkflowExecution, JoinHandle<WorkflowExecution>), EngineError> {
        let prior = self.get(execution_id).await?;
        if !prior.status.is_terminal() {
            return Err(EngineError::NotResumable {
                execution_id: prior.id,
                status: prior.status,
            });
        }
        if prior.snapshot.node(node_id).is_none() {
            return Err(EngineError::UnknownNode {
                execution_id: prior.id,
                node_id: node_id.to_string(),
            });
        }

        let closure: HashSet<String> = NodeGraph::build(&prior.snapshot.nodes, &prior.snapshot.edges)
            .downstream_closure(node_id)
            .into_iter()
            .map(str::to_string)
            .collect();
        let node_executions = prior
            .snapshot
            .nodes
            .iter()
            .map(|node| match prior.node(&node.node_id) {
                Some(record) if !closure.contains(&node.node_id) => record.clone(),
                _ => NodeExecution::pending(node),
            })
            .collect();
        let secrets = resolve_secrets(
            &prior.snapshot.variables,
            &prior.variables,
            self.secrets.as_deref(),
        )
        .await?;

        tracing::info!(
            execution_id = %prior.id,
            node_id,
            rerun = closure.len(),
            "resuming execution"
        );

        let execution = WorkflowExecution {
            id: Uuid::now_v7(),
            workflow_id: prior.workflow_id,
            workflow_name: prior.workflow_name.clone(),
            workflow_version: prior.workflow_version,
            snapshot: prior.snapshot.clone(),
            trigger_type: TriggerType::Resume,
            triggered_by: prior.triggered_by.clone(),
            status: ExecutionStatus::Queued,
            variables: prior.variables.clone(),
            node_executions,
            final_artifacts: Vec::new(),
            share_link_ids: Vec::new(),
            last_seq: 0,
            error_message: None,
            resumed_from: Some(ResumeOrigin {
                execution_id: prior.id,
                node_id: node_id.to_string(),
            }),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.launch(execution, secrets).await
    }

    /// Persist the queued record and hand it to a coordinator task.
    async fn launch(
        &self,
        execution: WorkflowExecution,
        secrets: Map<String, Value>,
    ) -> Result<(WorkflowExecution, JoinHandle<WorkflowExecution>), EngineError> {
        let mut recorder = ExecutionRecorder::new(Arc::clone(&self.repo), self.events.clone(), execution);
        recorder.try_record(ExecutionEventKind::ExecutionQueued).await?;
        let queued = recorder.execution().clone();

        let cancel = CancellationToken::new();
        self.running.insert(queued.id, cancel.clone());
        tracing::info!(
            execution_id = %queued.id,
            workflow_id = %queued.workflow_id,
            trigger = queued.trigger_type.as_str(),
            nodes = queued.node_executions.len(),
            "execution queued"
        );

        let engine = self.clone();
        let handle = tokio::spawn(engine.coordinate(recorder, secrets, cancel));
        Ok((queued, handle))
    }

    // -----------------------------------------------------------------------
    // Coordinator
    // -----------------------------------------------------------------------

    async fn coordinate(
        self,
        mut recorder: ExecutionRecorder<R>,
        secrets: Map<String, Value>,
        cancel: CancellationToken,
    ) -> WorkflowExecution {
        let execution_id = recorder.execution().id;
        let plan = ExecutionPlan::from_snapshot(&recorder.execution().snapshot);
        let limit = recorder
            .execution()
            .snapshot
            .max_concurrency
            .unwrap_or(self.settings.max_concurrency)
            .max(1);
        let mut variables = recorder.execution().variables.clone();
        variables.extend(secrets);
        let variables = Arc::new(variables);

        {
            let execution = recorder.execution_mut();
            execution.status = ExecutionStatus::Running;
            execution.started_at = Some(Utc::now());
        }
        recorder.record(ExecutionEventKind::ExecutionStarted).await;
        tracing::info!(%execution_id, limit, "execution started");

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let mut tasks: JoinSet<NodeReport> = JoinSet::new();
        let mut cancelled = cancel.is_cancelled();

        loop {
            self.skip_blocked(&mut recorder, &plan, &variables).await;

            if !cancelled {
                for idx in 0..plan.len() {
                    if tasks.len() >= limit {
                        break;
                    }
                    if recorder.execution().node_executions[idx].status != NodeStatus::Pending {
                        continue;
                    }
                    let Readiness::Ready(inputs) = plan.readiness(idx, recorder.execution(), &variables)
                    else {
                        continue;
                    };

                    let record = &mut recorder.execution_mut().node_executions[idx];
                    record.status = NodeStatus::Running;
                    record.started_at = Some(Utc::now());
                    record.input_artifact_refs = inputs
                        .iter()
                        .filter_map(|input| match &input.source {
                            InputSource::Artifact { reference, .. } => Some(reference.clone()),
                            InputSource::Variable(_) => None,
                        })
                        .collect();

                    let task = NodeTask {
                        execution_id,
                        idx,
                        node: plan.nodes[idx].clone(),
                        inputs,
                        variables: Arc::clone(&variables),
                        registry: Arc::clone(&self.registry),
                        resolver: self.resolver.clone(),
                        services: Arc::clone(&self.services),
                        permits: Arc::clone(&self.permits),
                        cancel: cancel.clone(),
                        attempt_timeout: self.attempt_timeout(),
                        progress: progress_tx.clone(),
                    };
                    tasks.spawn(async move {
                        AssertUnwindSafe(task.run()).catch_unwind().await.unwrap_or_else(|_| NodeReport {
                            idx,
                            attempts: 0,
                            duration_ms: 0,
                            outcome: NodeOutcome::Failed("node task panicked".to_string()),
                        })
                    });
                    tracing::debug!(%execution_id, node_id = %plan.nodes[idx].node_id, "node launched");
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                Some(progress) = progress_rx.recv() => {
                    self.apply_progress(&mut recorder, &plan, progress).await;
                }
                Some(joined) = tasks.join_next() => {
                    // Everything a task sent happened before it returned.
                    while let Ok(progress) = progress_rx.try_recv() {
                        self.apply_progress(&mut recorder, &plan, progress).await;
                    }
                    match joined {
                        Ok(report) => self.apply_report(&mut recorder, &plan, report).await,
                        Err(e) => tracing::error!(%execution_id, error = %e, "node task aborted"),
                    }
                }
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    tracing::info!(%execution_id, running = tasks.len(), "cancellation requested; draining running nodes");
                }
            }
        }

        self.finish(recorder, &plan, cancelled || cancel.is_cancelled()).await
    }

    fn attempt_timeout(&self) -> Option<Duration> {
        (self.settings.node_timeout_secs > 0).then(|| Duration::from_secs(self.settings.node_timeout_secs))
    }

    /// Mark every pending node that can never run as skipped.
    ///
    /// Repeats until stable so a skip propagates down whole chains.
    async fn skip_blocked(
        &self,
        recorder: &mut ExecutionRecorder<R>,
        plan: &ExecutionPlan,
        variables: &Map<String, Value>,
    ) {
        loop {
            let blocked = (0..plan.len()).find_map(|idx| {
                if recorder.execution().node_executions[idx].status != NodeStatus::Pending {
                    return None;
                }
                match plan.readiness(idx, recorder.execution(), variables) {
                    Readiness::Blocked(reason) => Some((idx, reason)),
                    _ => None,
                }
            });
            let Some((idx, reason)) = blocked else {
                return;
            };
            self.skip_node(recorder, plan, idx, reason).await;
        }
    }

    async fn skip_node(
        &self,
        recorder: &mut ExecutionRecorder<R>,
        plan: &ExecutionPlan,
        idx: usize,
        reason: String,
    ) {
        let node_id = plan.nodes[idx].node_id.clone();
        tracing::debug!(execution_id = %recorder.execution().id, %node_id, %reason, "node skipped");
        let record = &mut recorder.execution_mut().node_executions[idx];
        record.status = NodeStatus::Skipped;
        record.completed_at = Some(Utc::now());
        record.error_message = Some(reason.clone());
        record.logs.push(NodeLogEntry::new(LogLevel::Info, format!("skipped: {reason}")));
        recorder
            .record(ExecutionEventKind::NodeSkipped { node_id, reason })
            .await;
    }

    async fn apply_progress(
        &self,
        recorder: &mut ExecutionRecorder<R>,
        plan: &ExecutionPlan,
        progress: NodeProgress,
    ) {
        let execution_id = recorder.execution().id;
        match progress {
            NodeProgress::AttemptStarted { idx, attempt } => {
                let node_id = plan.nodes[idx].node_id.clone();
                tracing::info!(%execution_id, %node_id, attempt, "node attempt started");
                let record = &mut recorder.execution_mut().node_executions[idx];
                record.attempt_count = attempt;
                record
                    .logs
                    .push(NodeLogEntry::new(LogLevel::Info, format!("attempt {attempt} started")));
                recorder
                    .record(ExecutionEventKind::NodeStarted { node_id, attempt })
                    .await;
            }
            NodeProgress::Retrying {
                idx,
                attempt,
                delay,
                error,
            } => {
                let node_id = plan.nodes[idx].node_id.clone();
                let delay_ms = delay.as_millis() as u64;
                tracing::warn!(%execution_id, %node_id, attempt, delay_ms, %error, "node attempt failed; retrying");
                recorder.execution_mut().node_executions[idx].logs.push(NodeLogEntry::new(
                    LogLevel::Warn,
                    format!("attempt {attempt} failed: {error}; retrying in {delay_ms}ms"),
                ));
                recorder
                    .record(ExecutionEventKind::NodeRetrying {
                        node_id,
                        attempt,
                        delay_ms,
                        error,
                    })
                    .await;
            }
            NodeProgress::Log { idx, level, message } => {
                recorder.execution_mut().node_executions[idx]
                    .logs
                    .push(NodeLogEntry::new(level, message));
            }
        }
    }

    async fn apply_report(
        &self,
        recorder: &mut ExecutionRecorder<R>,
        plan: &ExecutionPlan,
        report: NodeReport,
    ) {
        let execution_id = recorder.execution().id;
        let node_id = plan.nodes[report.idx].node_id.clone();

        match report.outcome {
            NodeOutcome::Completed(artifacts) => {
                let produced: Vec<(String, Uuid)> = artifacts
                    .iter()
                    .map(|a| (a.slot_id.clone(), a.artifact_id))
                    .collect();
                let record = &mut recorder.execution_mut().node_executions[report.idx];
                record.status = NodeStatus::Completed;
                record.attempt_count = report.attempts;
                record.completed_at = Some(Utc::now());
                record.duration_ms = Some(report.duration_ms);
                record.output_artifacts = artifacts;
                record.logs.push(NodeLogEntry::new(
                    LogLevel::Info,
                    format!("completed after {} attempt(s)", report.attempts),
                ));

                for (slot_id, artifact_id) in produced {
                    recorder
                        .record(ExecutionEventKind::ArtifactProduced {
                            node_id: node_id.clone(),
                            slot_id,
                            artifact_id,
                        })
                        .await;
                }
                tracing::info!(%execution_id, %node_id, attempts = report.attempts, duration_ms = report.duration_ms, "node completed");
                recorder
                    .record(ExecutionEventKind::NodeCompleted {
                        node_id,
                        attempt_count: report.attempts,
                        duration_ms: report.duration_ms,
                    })
                    .await;
            }
            NodeOutcome::Failed(error) => {
                tracing::warn!(%execution_id, %node_id, attempts = report.attempts, %error, "node failed");
                let record = &mut recorder.execution_mut().node_executions[report.idx];
                record.status = NodeStatus::Failed;
                record.attempt_count = report.attempts;
                record.completed_at = Some(Utc::now());
                record.duration_ms = Some(report.duration_ms);
                record.error_message = Some(error.clone());
                record.logs.push(NodeLogEntry::new(LogLevel::Error, error.clone()));
                recorder
                    .record(ExecutionEventKind::NodeFailed { node_id, error })
                    .await;
            }
            NodeOutcome::NotStarted => {
                self.skip_node(
                    recorder,
                    plan,
                    report.idx,
                    "execution cancelled before the node started".to_string(),
                )
                .await;
            }
        }
    }

    async fn finish(
        &self,
        mut recorder: ExecutionRecorder<R>,
        plan: &ExecutionPlan,
        cancelled: bool,
    ) -> WorkflowExecution {
        let leftover_reason = if cancelled {
            "execution cancelled"
        } else {
            "dependencies were not satisfied"
        };
        for idx in 0..plan.len() {
            if recorder.execution().node_executions[idx].status == NodeStatus::Pending {
                self.skip_node(&mut recorder, plan, idx, leftover_reason.to_string())
                    .await;
            }
        }

        let execution = recorder.execution_mut();
        let describe = |status: NodeStatus, fallback: &str| -> Vec<String> {
            execution
                .node_executions
                .iter()
                .filter(|n| n.status == status)
                .map(|n| {
                    format!(
                        "{}: {}",
                        n.node_id,
                        n.error_message.as_deref().unwrap_or(fallback)
                    )
                })
                .collect()
        };
        let failures = describe(NodeStatus::Failed, "failed");
        let never_ran = describe(NodeStatus::Skipped, "skipped");

        let (status, error_message) = if cancelled {
            (ExecutionStatus::Cancelled, Some("execution cancelled".to_string()))
        } else if !failures.is_empty() || !never_ran.is_empty() {
            let mut parts = Vec::new();
            if !failures.is_empty() {
                parts.push(format!("{} node(s) failed: {}", failures.len(), failures.join("; ")));
            }
            if !never_ran.is_empty() {
                parts.push(format!(
                    "{} node(s) never became eligible: {}",
                    never_ran.len(),
                    never_ran.join("; ")
                ));
            }
            (ExecutionStatus::Failed, Some(parts.join(". ")))
        } else {
            (ExecutionStatus::Completed, None)
        };

        let final_artifacts = (0..plan.len())
            .filter(|&idx| plan.is_sink(idx))
            .map(|idx| &execution.node_executions[idx])
            .filter(|n| n.status == NodeStatus::Completed)
            .flat_map(|n| n.output_artifacts.iter().cloned())
            .collect();
        execution.final_artifacts = final_artifacts;
        execution.status = status;
        execution.error_message = error_message.clone();
        execution.completed_at = Some(Utc::now());

        let execution_id = execution.id;
        recorder
            .record(ExecutionEventKind::ExecutionFinished {
                status,
                error_message,
            })
            .await;
        self.running.remove(&execution_id);

        let execution = recorder.into_execution();
        let duration_ms = execution
            .started_at
            .zip(execution.completed_at)
            .map(|(start, end)| (end - start).num_milliseconds())
            .unwrap_or_default();
        tracing::info!(
            %execution_id,
            status = %execution.status,
            duration_ms,
            final_artifacts = execution.final_artifacts.len(),
            "execution finished"
        );
        execution
    }

    // -----------------------------------------------------------------------
    // Control and queries
    // -----------------------------------------------------------------------

    /// Request cooperative cancellation.
    ///
    /// Running attempts finish on their own; nothing new starts. An
    /// execution stored as live that no coordinator in this process drives
    /// is settled as cancelled directly.
    pub async fn cancel(&self, execution_id: &Uuid) -> Result<(), EngineError> {
        let token = self.running.get(execution_id).map(|t| t.value().clone());
        if let Some(token) = token {
            token.cancel();
            tracing::info!(%execution_id, "execution cancellation requested");
            return Ok(());
        }

        let execution = self.get(execution_id).await?;
        if execution.status.is_terminal() {
            return Err(EngineError::AlreadyTerminal {
                execution_id: execution.id,
                status: execution.status,
            });
        }
        self.settle_orphan(execution, ExecutionStatus::Cancelled, "execution cancelled")
            .await?;
        Ok(())
    }

    /// Fail every execution left `queued` or `running` in storage that this
    /// process does not drive. Call once at startup.
    pub async fn recover_interrupted(&self) -> Result<usize, EngineError> {
        let mut recovered = 0;
        for execution in self.repo.list_unfinished().await? {
            if self.running.contains_key(&execution.id) {
                continue;
            }
            self.settle_orphan(execution, ExecutionStatus::Failed, "interrupted by restart")
                .await?;
            recovered += 1;
        }
        if recovered > 0 {
            tracing::warn!(recovered, "marked interrupted executions as failed");
        }
        Ok(recovered)
    }

    async fn settle_orphan(
        &self,
        execution: WorkflowExecution,
        status: ExecutionStatus,
        reason: &str,
    ) -> Result<(), EngineError> {
        let mut recorder = ExecutionRecorder::new(Arc::clone(&self.repo), self.events.clone(), execution);
        let now = Utc::now();
        let execution = recorder.execution_mut();
        for record in &mut execution.node_executions {
            let settled = match record.status {
                NodeStatus::Running => NodeStatus::Failed,
                NodeStatus::Pending => NodeStatus::Skipped,
                _ => continue,
            };
            record.status = settled;
            record.completed_at = Some(now);
            record.error_message = Some(reason.to_string());
        }
        execution.status = status;
        execution.error_message = Some(reason.to_string());
        execution.completed_at = Some(now);
        tracing::info!(execution_id = %execution.id, %status, reason, "settled orphaned execution");

        recorder
            .try_record(ExecutionEventKind::ExecutionFinished {
                status,
                error_message: Some(reason.to_string()),
            })
            .await?;
        Ok(())
    }

    pub fn is_running(&self, execution_id: &Uuid) -> bool {
        self.running.contains_key(execution_id)
    }

    pub async fn get(&self, execution_id: &Uuid) -> Result<WorkflowExecution, EngineError> {
        self.repo
            .get(execution_id)
            .await?
            .ok_or(EngineError::NotFound(*execution_id))
    }

    pub async fn list(
        &self,
        filter: &ExecutionFilter,
        page: PageRequest,
    ) -> Result<Page<WorkflowExecution>, EngineError> {
        Ok(self.repo.list(filter, page).await?)
    }

    pub async fn node_logs(
        &self,
        execution_id: &Uuid,
        node_id: &str,
    ) -> Result<Vec<NodeLogEntry>, EngineError> {
        let execution = self.get(execution_id).await?;
        execution
            .node(node_id)
            .map(|n| n.logs.clone())
            .ok_or_else(|| EngineError::UnknownNode {
                execution_id: *execution_id,
                node_id: node_id.to_string(),
            })
    }

    /// Durable events with `seq > after_seq`, for reconnecting consumers.
    pub async fn events_since(
        &self,
        execution_id: &Uuid,
        after_seq: u64,
    ) -> Result<Vec<ExecutionEvent>, EngineError> {
        if self.repo.get(execution_id).await?.is_none() {
            return Err(EngineError::NotFound(*execution_id));
        }
        Ok(self.repo.list_events_since(execution_id, after_seq).await?)
    }

    /// Live stream of every execution's events.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }
}

async fn join(handle: JoinHandle<WorkflowExecution>) -> Result<WorkflowExecution, EngineError> {
    handle.await.map_err(|e| EngineError::Internal(e.to_string()))
}
