//! Workflow definitions: graph helpers, structural validation and the store
//! service.
//!
//! - `dag` -- petgraph-backed node graph, cycle search and forward closure
//! - `validation` -- batch validation against the capsule registry
//! - `service` -- create/update/get/list/delete over a `WorkflowRepository`

pub mod dag;
pub mod service;
pub mod validation;

use capflow_types::workflow::Workflow;

use crate::capsule::CapsuleRegistry;

pub use service::{WorkflowService, WorkflowServiceError};
pub use validation::{DefinitionError, ValidationErrors, validate_workflow};

/// Fill in what a definition may leave implicit.
///
/// - nodes declaring neither inputs nor outputs get their capsule's default slots
/// - edges and triggers without an ID get a deterministic one
pub fn fill_defaults(workflow: &mut Workflow, registry: &CapsuleRegistry) {
    for node in &mut workflow.nodes {
        if !node.inputs.is_empty() || !node.outputs.is_empty() {
            continue;
        }
        if let Ok(meta) = registry.get_type(&node.node_type) {
            node.inputs = meta.default_inputs.clone();
            node.outputs = meta.default_outputs.clone();
        }
    }

    for edge in &mut workflow.edges {
        if edge.edge_id.is_empty() {
            edge.edge_id = format!(
                "{}.{}->{}.{}",
                edge.source_node_id, edge.source_slot_id, edge.target_node_id, edge.target_slot_id
            );
        }
    }

    for (i, trigger) in workflow.triggers.iter_mut().enumerate() {
        if trigger.trigger_id.is_empty() {
            trigger.trigger_id = format!("{}-{}", trigger.config.trigger_type().as_str(), i + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::builtin_registry;
    use serde_json::json;

    #[test]
    fn fills_slots_and_ids() {
        let mut wf: Workflow = serde_json::from_value(json!({
            "name": "demo",
            "nodes": [
                {"node_id": "start", "name": "Start", "type": "manual-trigger"},
                {"node_id": "custom", "name": "Custom", "type": "text-template",
                 "outputs": [{"slot_id": "out", "name": "Out", "data_type": "text"}]}
            ],
            "edges": [{"source_node_id": "start", "source_slot_id": "payload",
                       "target_node_id": "custom", "target_slot_id": "data"}],
            "triggers": [{"type": "manual"}, {"type": "webhook", "path": "go"}]
        }))
        .unwrap();

        fill_defaults(&mut wf, &builtin_registry());

        assert_eq!(wf.nodes[0].outputs[0].slot_id, "payload");
        // Declared slots are left alone.
        assert!(wf.nodes[1].inputs.is_empty());
        assert_eq!(wf.nodes[1].outputs[0].slot_id, "out");
        assert_eq!(wf.edges[0].edge_id, "start.payload->custom.data");
        assert_eq!(wf.triggers[0].trigger_id, "manual-1");
        assert_eq!(wf.triggers[1].trigger_id, "webhook-2");
    }
}
