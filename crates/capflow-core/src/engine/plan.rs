//! Index-based view of a frozen snapshot used by the coordinator.
//!
//! Node `i` of the plan is node `i` of the snapshot and record `i` of the
//! execution's `node_executions`.

use std::collections::HashMap;

use capflow_types::artifact::{ArtifactRef, ExecutionArtifact};
use capflow_types::execution::{NodeStatus, WorkflowExecution};
use capflow_types::workflow::{WorkflowEdge, WorkflowNode, WorkflowSnapshot};
use serde_json::{Map, Value};

use crate::workflow::dag::NodeGraph;

/// Where one input slot's payload comes from.
#[derive(Debug, Clone)]
pub enum InputSource {
    Artifact {
        reference: ArtifactRef,
        artifact: ExecutionArtifact,
    },
    Variable(Value),
}

#[derive(Debug, Clone)]
pub struct NodeInput {
    pub slot_id: String,
    pub source: InputSource,
}

/// Whether a pending node can start.
#[derive(Debug)]
pub enum Readiness {
    /// Some producer has not finished yet.
    Waiting,
    Ready(Vec<NodeInput>),
    /// The node can never run; the string says why.
    Blocked(String),
}

#[derive(Debug)]
pub struct ExecutionPlan {
    pub nodes: Vec<WorkflowNode>,
    /// Incoming edges per node with the producer's index, in edge order.
    incoming: Vec<Vec<(usize, WorkflowEdge)>>,
    sinks: Vec<bool>,
}

impl ExecutionPlan {
    pub fn from_snapshot(snapshot: &WorkflowSnapshot) -> Self {
        let graph = NodeGraph::build(&snapshot.nodes, &snapshot.edges);
        let index: HashMap<&str, usize> = snapshot
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.node_id.as_str(), i))
            .collect();

        let incoming = snapshot
            .nodes
            .iter()
            .map(|node| {
                graph
                    .incoming(&node.node_id)
                    .into_iter()
                    .filter_map(|edge| {
                        index
                            .get(edge.source_node_id.as_str())
                            .map(|&src| (src, edge.clone()))
                    })
                    .collect()
            })
            .collect();
        let sinks = snapshot
            .nodes
            .iter()
            .map(|node| graph.is_sink(&node.node_id))
            .collect();

        Self {
            nodes: snapshot.nodes.clone(),
            incoming,
            sinks,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_sink(&self, idx: usize) -> bool {
        self.sinks[idx]
    }

    /// Evaluate node `idx` against the current records.
    ///
    /// A failed or skipped producer blocks the node even while other
    /// producers are still running.
    pub fn readiness(
        &self,
        idx: usize,
        execution: &WorkflowExecution,
        variables: &Map<String, Value>,
    ) -> Readiness {
        let node = &self.nodes[idx];
        let mut inputs = Vec::new();
        let mut waiting = false;

        for (src, edge) in &self.incoming[idx] {
            let producer = &execution.node_executions[*src];
            match producer.status {
                NodeStatus::Failed => {
                    return Readiness::Blocked(format!(
                        "upstream node '{}' failed",
                        edge.source_node_id
                    ));
                }
                NodeStatus::Skipped => {
                    return Readiness::Blocked(format!(
                        "upstream node '{}' was skipped",
                        edge.source_node_id
                    ));
                }
                NodeStatus::Completed => match producer.output_for_slot(&edge.source_slot_id) {
                    Some(artifact) => inputs.push(NodeInput {
                        slot_id: edge.target_slot_id.clone(),
                        source: InputSource::Artifact {
                            reference: ArtifactRef {
                                source_node_id: edge.source_node_id.clone(),
                                source_slot_id: edge.source_slot_id.clone(),
                                artifact_id: artifact.artifact_id,
                            },
                            artifact: artifact.clone(),
                        },
                    }),
                    None if node
                        .input(&edge.target_slot_id)
                        .is_none_or(|slot| slot.required) =>
                    {
                        return Readiness::Blocked(format!(
                            "upstream node '{}' did not produce slot '{}'",
                            edge.source_node_id, edge.source_slot_id
                        ));
                    }
                    None => {}
                },
                NodeStatus::Pending | NodeStatus::Running => waiting = true,
            }
        }
        if waiting {
            return Readiness::Waiting;
        }

        for binding in &node.bindings {
            match variables.get(&binding.variable_key) {
                Some(value) => inputs.push(NodeInput {
                    slot_id: binding.slot_id.clone(),
                    source: InputSource::Variable(value.clone()),
                }),
                None if node.input(&binding.slot_id).is_some_and(|slot| slot.required) => {
                    return Readiness::Blocked(format!(
                        "variable '{}' has no value for required slot '{}'",
                        binding.variable_key, binding.slot_id
                    ));
                }
                None => {}
            }
        }
        Readiness::Ready(inputs)
    }
}
