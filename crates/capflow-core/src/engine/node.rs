//! One node's run inside an execution: resolve inputs, attempt the capsule
//! under the retry policy, store outputs.
//!
//! A node task never touches the execution record. It reports progress to
//! the coordinator over an unbounded channel and returns a `NodeReport` when
//! it is done.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use capflow_types::artifact::{ArtifactContent, ExecutionArtifact};
use capflow_types::execution::LogLevel;
use capflow_types::workflow::WorkflowNode;
use serde_json::{Map, Value};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::plan::{InputSource, NodeInput};
use super::retry::{RetryDecision, RetryHandler};
use crate::artifact::{ArtifactDraft, ArtifactResolver};
use crate::capsule::schema;
use crate::capsule::{CapsuleContext, CapsuleOutput, CapsuleRegistry, CapsuleServices};

/// Progress sent while the task runs.
#[derive(Debug)]
pub enum NodeProgress {
    AttemptStarted {
        idx: usize,
        attempt: u32,
    },
    Retrying {
        idx: usize,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Log {
        idx: usize,
        level: LogLevel,
        message: String,
    },
}

#[derive(Debug)]
pub enum NodeOutcome {
    Completed(Vec<ExecutionArtifact>),
    Failed(String),
    /// Cancelled before the first attempt began.
    NotStarted,
}

#[derive(Debug)]
pub struct NodeReport {
    pub idx: usize,
    pub attempts: u32,
    pub duration_ms: u64,
    pub outcome: NodeOutcome,
}

pub struct NodeTask {
    pub execution_id: Uuid,
    pub idx: usize,
    pub node: WorkflowNode,
    pub inputs: Vec<NodeInput>,
    pub variables: Arc<Map<String, Value>>,
    pub registry: Arc<CapsuleRegistry>,
    pub resolver: ArtifactResolver,
    pub services: Arc<dyn CapsuleServices>,
    pub permits: Arc<Semaphore>,
    pub cancel: CancellationToken,
    /// `None` disables the per-attempt timeout.
    pub attempt_timeout: Option<Duration>,
    pub progress: mpsc::UnboundedSender<NodeProgress>,
}

impl NodeTask {
    pub async fn run(self) -> NodeReport {
        let started = Instant::now();
        let (attempts, outcome) = self.attempt_all().await;
        NodeReport {
            idx: self.idx,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            outcome,
        }
    }

    async fn attempt_all(&self) -> (u32, NodeOutcome) {
        let Some(capsule) = self.registry.get(&self.node.node_type) else {
            return (
                0,
                NodeOutcome::Failed(format!("unknown capsule type '{}'", self.node.node_type)),
            );
        };
        let config = schema::apply_defaults(capsule.meta(), &self.node.config);

        let mut attempt = 1;
        loop {
            if self.cancel.is_cancelled() {
                return cancelled_before(attempt);
            }
            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => permit,
                _ = self.cancel.cancelled() => return cancelled_before(attempt),
            };
            let Ok(permit) = permit else {
                return (
                    attempt - 1,
                    NodeOutcome::Failed("engine is shutting down".to_string()),
                );
            };

            self.send(NodeProgress::AttemptStarted {
                idx: self.idx,
                attempt,
            });
            tracing::debug!(
                execution_id = %self.execution_id,
                node_id = %self.node.node_id,
                attempt,
                "node attempt started"
            );

            // Input resolution is part of the attempt.
            let result = match self.resolve_inputs().await {
                Ok(inputs) => {
                    let ctx = CapsuleContext {
                        node_id: &self.node.node_id,
                        config: &config,
                        inputs: &inputs,
                        variables: &self.variables,
                        services: self.services.as_ref(),
                    };
                    match self.attempt_timeout {
                        Some(limit) => match tokio::time::timeout(limit, capsule.execute(ctx)).await {
                            Ok(result) => result.map_err(|e| e.to_string()),
                            Err(_) => Err(format!("attempt timed out after {}s", limit.as_secs())),
                        },
                        None => capsule.execute(ctx).await.map_err(|e| e.to_string()),
                    }
                }
                Err(error) => Err(error),
            };
            drop(permit);

            let error = match result {
                Ok(output) => match self.store_outputs(output).await {
                    Ok(artifacts) => return (attempt, NodeOutcome::Completed(artifacts)),
                    Err(error) => error,
                },
                Err(error) => error,
            };

            match RetryHandler::decide(&self.node, attempt) {
                RetryDecision::GiveUp => return (attempt, NodeOutcome::Failed(error)),
                RetryDecision::RetryAfter {
                    delay,
                    next_attempt,
                } => {
                    self.send(NodeProgress::Retrying {
                        idx: self.idx,
                        attempt,
                        delay,
                        error: error.clone(),
                    });
                    if !RetryHandler::wait(delay, &self.cancel).await {
                        return (
                            attempt,
                            NodeOutcome::Failed(format!(
                                "{error} (retry abandoned: execution cancelled)"
                            )),
                        );
                    }
                    attempt = next_attempt;
                }
            }
        }
    }

    async fn resolve_inputs(&self) -> Result<HashMap<String, ArtifactContent>, String> {
        let mut resolved = HashMap::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let content = match &input.source {
                InputSource::Artifact { artifact, .. } => self
                    .resolver
                    .resolve(artifact)
                    .await
                    .map_err(|e| format!("failed to resolve input '{}': {e}", input.slot_id))?,
                InputSource::Variable(value) => ArtifactContent::Json(value.clone()),
            };
            resolved.insert(input.slot_id.clone(), content);
        }
        Ok(resolved)
    }

    async fn store_outputs(&self, output: CapsuleOutput) -> Result<Vec<ExecutionArtifact>, String> {
        for line in output.logs {
            self.send(NodeProgress::Log {
                idx: self.idx,
                level: LogLevel::Info,
                message: line,
            });
        }

        let mut artifacts = Vec::with_capacity(output.slots.len());
        for slot in output.slots {
            let Some(declared) = self.node.output(&slot.slot_id) else {
                self.send(NodeProgress::Log {
                    idx: self.idx,
                    level: LogLevel::Warn,
                    message: format!("discarded output for undeclared slot '{}'", slot.slot_id),
                });
                continue;
            };
            let mime_type = slot
                .mime_type
                .unwrap_or_else(|| declared.data_type.default_mime_type().to_string());
            let stored = self
                .resolver
                .store(ArtifactDraft {
                    name: declared.name.clone(),
                    slot_id: slot.slot_id.clone(),
                    mime_type,
                    content: slot.content,
                })
                .await;
            match stored {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    self.discard_partial(&artifacts).await;
                    return Err(format!("failed to store output '{}': {e}", slot.slot_id));
                }
            }
        }
        Ok(artifacts)
    }

    /// Drop blobs written earlier in a failed attempt.
    async fn discard_partial(&self, artifacts: &[ExecutionArtifact]) {
        for artifact in artifacts {
            if let Err(e) = self.resolver.discard(artifact).await {
                tracing::warn!(
                    execution_id = %self.execution_id,
                    node_id = %self.node.node_id,
                    artifact_id = %artifact.artifact_id,
                    error = %e,
                    "failed to discard partial output"
                );
            }
        }
    }

    fn send(&self, progress: NodeProgress) {
        // The coordinator outlives every node task it spawns.
        let _ = self.progress.send(progress);
    }
}

fn cancelled_before(attempt: u32) -> (u32, NodeOutcome) {
    if attempt == 1 {
        (0, NodeOutcome::NotStarted)
    } else {
        (
            attempt - 1,
            NodeOutcome::Failed("retry abandoned: execution cancelled".to_string()),
        )
    }
}
