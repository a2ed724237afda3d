//! Structural validation of workflow definitions.
//!
//! Validation never stops at the first problem: every violation is collected
//! so an editor can highlight all of them in one pass.

use std::collections::{HashMap, HashSet};
use std::fmt;

use capflow_types::artifact::SlotDataType;
use capflow_types::workflow::{TriggerConfig, VariableType, Workflow};
use serde::Serialize;

use super::dag::NodeGraph;
use crate::capsule::CapsuleRegistry;
use crate::trigger::schedule::TimerSchedule;

/// Which side of a node a slot sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotDirection {
    Input,
    Output,
}

impl fmt::Display for SlotDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
        })
    }
}

/// A single structural problem with a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DefinitionError {
    #[error("workflow has no nodes")]
    EmptyWorkflow,

    #[error("duplicate node id '{node_id}'")]
    DuplicateNode { node_id: String },

    #[error("node '{node_id}' has unknown capsule type '{node_type}'")]
    UnknownCapsuleType { node_id: String, node_type: String },

    #[error("node '{node_id}' config field '{field}': {message}")]
    InvalidConfig {
        node_id: String,
        field: String,
        message: String,
    },

    #[error("node '{node_id}' retry policy must allow at least one attempt")]
    InvalidRetryPolicy { node_id: String },

    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },

    #[error("edge '{edge_id}': node '{node_id}' has no {direction} slot '{slot_id}'")]
    UnknownSlot {
        edge_id: String,
        node_id: String,
        slot_id: String,
        direction: SlotDirection,
    },

    #[error("edge '{edge_id}': {target_type} input cannot accept {source_type} output")]
    IncompatibleTypes {
        edge_id: String,
        source_type: SlotDataType,
        target_type: SlotDataType,
    },

    #[error("cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("required input '{slot_id}' of node '{node_id}' has no edge or variable binding")]
    UnboundInput { node_id: String, slot_id: String },

    #[error("input '{slot_id}' of node '{node_id}' has {sources} sources (expected one)")]
    AmbiguousInput {
        node_id: String,
        slot_id: String,
        sources: usize,
    },

    #[error("node '{node_id}' binds unknown input slot '{slot_id}'")]
    UnknownBindingSlot { node_id: String, slot_id: String },

    #[error("node '{node_id}' binds '{slot_id}' to unknown variable '{variable_key}'")]
    UnknownVariable {
        node_id: String,
        slot_id: String,
        variable_key: String,
    },

    #[error("duplicate variable '{key}'")]
    DuplicateVariable { key: String },

    #[error("trigger '{trigger_id}': {message}")]
    InvalidTrigger { trigger_id: String, message: String },
}

/// A batch of definition errors, as returned by save and execute paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(pub Vec<DefinitionError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[DefinitionError] {
        &self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} definition error(s)", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            write!(f, "{} {err}", if i == 0 { ":" } else { ";" })?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl From<Vec<DefinitionError>> for ValidationErrors {
    fn from(errors: Vec<DefinitionError>) -> Self {
        Self(errors)
    }
}

/// Check a workflow against the registry, collecting every violation.
pub fn validate_workflow(
    workflow: &Workflow,
    registry: &CapsuleRegistry,
) -> Result<(), Vec<DefinitionError>> {
    let mut errors = Vec::new();

    if workflow.nodes.is_empty() {
        errors.push(DefinitionError::EmptyWorkflow);
    }

    // -- nodes ---------------------------------------------------------------
    let mut seen = HashSet::new();
    for node in &workflow.nodes {
        if !seen.insert(node.node_id.as_str()) {
            errors.push(DefinitionError::DuplicateNode {
                node_id: node.node_id.clone(),
            });
            continue;
        }

        match registry.validate_config(&node.node_type, &node.config) {
            Ok(report) => {
                errors.extend(report.into_iter().filter(|v| !v.valid).map(|v| {
                    DefinitionError::InvalidConfig {
                        node_id: node.node_id.clone(),
                        message: v.message.unwrap_or_else(|| "invalid".to_string()),
                        field: v.key,
                    }
                }));
            }
            Err(_) => errors.push(DefinitionError::UnknownCapsuleType {
                node_id: node.node_id.clone(),
                node_type: node.node_type.clone(),
            }),
        }

        if node.retry.as_ref().is_some_and(|r| r.max_attempts == 0) {
            errors.push(DefinitionError::InvalidRetryPolicy {
                node_id: node.node_id.clone(),
            });
        }
    }

    let mut variable_keys = HashSet::new();
    for variable in &workflow.variables {
        if !variable_keys.insert(variable.key.as_str()) {
            errors.push(DefinitionError::DuplicateVariable {
                key: variable.key.clone(),
            });
        }
    }

    // -- edges -----------------------------------------------------------------
    // (target node, input slot) -> number of edges and bindings feeding it
    let mut sources: HashMap<(&str, &str), usize> = HashMap::new();

    for edge in &workflow.edges {
        let source = workflow.node(&edge.source_node_id);
        let target = workflow.node(&edge.target_node_id);
        for (node, node_id) in [
            (source, &edge.source_node_id),
            (target, &edge.target_node_id),
        ] {
            if node.is_none() {
                errors.push(DefinitionError::DanglingEdge {
                    edge_id: edge.edge_id.clone(),
                    node_id: node_id.clone(),
                });
            }
        }
        let (Some(source), Some(target)) = (source, target) else {
            continue;
        };

        let out_slot = source.output(&edge.source_slot_id);
        if out_slot.is_none() {
            errors.push(DefinitionError::UnknownSlot {
                edge_id: edge.edge_id.clone(),
                node_id: source.node_id.clone(),
                slot_id: edge.source_slot_id.clone(),
                direction: SlotDirection::Output,
            });
        }
        let in_slot = target.input(&edge.target_slot_id);
        if in_slot.is_none() {
            errors.push(DefinitionError::UnknownSlot {
                edge_id: edge.edge_id.clone(),
                node_id: target.node_id.clone(),
                slot_id: edge.target_slot_id.clone(),
                direction: SlotDirection::Input,
            });
        }

        if let (Some(out_slot), Some(in_slot)) = (out_slot, in_slot) {
            if !in_slot.data_type.accepts(out_slot.data_type) {
                errors.push(DefinitionError::IncompatibleTypes {
                    edge_id: edge.edge_id.clone(),
                    source_type: out_slot.data_type,
                    target_type: in_slot.data_type,
                });
            }
            *sources
                .entry((target.node_id.as_str(), in_slot.slot_id.as_str()))
                .or_default() += 1;
        }
    }

    // -- bindings ------------------------------------------------------------
    for node in &workflow.nodes {
        for binding in &node.bindings {
            let Some(slot) = node.input(&binding.slot_id) else {
                errors.push(DefinitionError::UnknownBindingSlot {
                    node_id: node.node_id.clone(),
                    slot_id: binding.slot_id.clone(),
                });
                continue;
            };
            if workflow.variable(&binding.variable_key).is_none() {
                errors.push(DefinitionError::UnknownVariable {
                    node_id: node.node_id.clone(),
                    slot_id: binding.slot_id.clone(),
                    variable_key: binding.variable_key.clone(),
                });
            }
            *sources
                .entry((node.node_id.as_str(), slot.slot_id.as_str()))
                .or_default() += 1;
        }
    }

    // -- input coverage --------------------------------------------------------
    let mut checked = HashSet::new();
    for node in &workflow.nodes {
        if !checked.insert(node.node_id.as_str()) {
            continue;
        }
        for slot in &node.inputs {
            let count = sources
                .get(&(node.node_id.as_str(), slot.slot_id.as_str()))
                .copied()
                .unwrap_or(0);
            if count == 0 && slot.required {
                errors.push(DefinitionError::UnboundInput {
                    node_id: node.node_id.clone(),
                    slot_id: slot.slot_id.clone(),
                });
            } else if count > 1 {
                errors.push(DefinitionError::AmbiguousInput {
                    node_id: node.node_id.clone(),
                    slot_id: slot.slot_id.clone(),
                    sources: count,
                });
            }
        }
    }

    // -- cycles ----------------------------------------------------------------
    errors.extend(
        NodeGraph::build(&workflow.nodes, &workflow.edges)
            .find_cycles()
            .into_iter()
            .map(|path| DefinitionError::Cycle { path }),
    );

    // -- triggers --------------------------------------------------------------
    let mut webhook_paths = HashSet::new();
    for trigger in &workflow.triggers {
        let invalid = |message: String| DefinitionError::InvalidTrigger {
            trigger_id: trigger.trigger_id.clone(),
            message,
        };
        match &trigger.config {
            TriggerConfig::Manual {} => {}
            TriggerConfig::Timer { cron, timezone } => {
                if let Err(e) = TimerSchedule::parse(cron, timezone) {
                    errors.push(invalid(e.to_string()));
                }
            }
            TriggerConfig::Webhook { path, .. } => {
                let path = path.trim_matches('/');
                if path.is_empty() {
                    errors.push(invalid("webhook path is empty".to_string()));
                } else if !webhook_paths.insert(path) {
                    errors.push(invalid(format!("duplicate webhook path '{path}'")));
                }
            }
            TriggerConfig::FileUpload { variable_key, .. } => match workflow.variable(variable_key) {
                Some(v) if v.var_type == VariableType::File => {}
                Some(_) => errors.push(invalid(format!("variable '{variable_key}' is not a file variable"))),
                None => errors.push(invalid(format!("unknown variable '{variable_key}'"))),
            },
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::builtin_registry;
    use crate::workflow::fill_defaults;
    use capflow_types::workflow::{
        RetryPolicy, VariableBinding, WorkflowEdge, WorkflowNode, WorkflowTrigger, WorkflowVariable,
    };
    use serde_json::json;

    fn node(id: &str, node_type: &str, config: serde_json::Value) -> WorkflowNode {
        WorkflowNode {
            node_id: id.to_string(),
            name: id.to_string(),
            node_type: node_type.to_string(),
            config: config.as_object().cloned().unwrap_or_default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            position: None,
            retry: None,
            bindings: Vec::new(),
        }
    }

    fn edge(from: &str, out: &str, to: &str, input: &str) -> WorkflowEdge {
        WorkflowEdge {
            edge_id: format!("{from}.{out}->{to}.{input}"),
            source_node_id: from.to_string(),
            source_slot_id: out.to_string(),
            target_node_id: to.to_string(),
            target_slot_id: input.to_string(),
        }
    }

    fn workflow(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Workflow {
        let mut wf: Workflow = serde_json::from_value(json!({"name": "t", "nodes": []})).unwrap();
        wf.nodes = nodes;
        wf.edges = edges;
        fill_defaults(&mut wf, &builtin_registry());
        wf
    }

    fn pipeline() -> Workflow {
        workflow(
            vec![
                node("start", "manual-trigger", json!({})),
                node("pick", "json-extractor", json!({"path": "topic"})),
                node("report", "report-renderer", json!({"title": "Report"})),
            ],
            vec![
                edge("start", "payload", "pick", "data"),
                edge("pick", "value", "report", "content"),
            ],
        )
    }

    #[test]
    fn valid_pipeline_passes() {
        validate_workflow(&pipeline(), &builtin_registry()).unwrap();
    }

    #[test]
    fn empty_workflow_is_rejected() {
        let errors = validate_workflow(&workflow(vec![], vec![]), &builtin_registry()).unwrap_err();
        assert_eq!(errors, vec![DefinitionError::EmptyWorkflow]);
    }

    #[test]
    fn collects_all_violations_at_once() {
        let mut wf = pipeline();
        wf.nodes.push(node("mystery", "does-not-exist", json!({})));
        wf.nodes.push(node("start", "manual-trigger", json!({})));
        wf.edges.push(edge("pick", "value", "ghost", "in"));
        wf.edges.push(edge("start", "nope", "report", "content"));

        let errors = validate_workflow(&wf, &builtin_registry()).unwrap_err();
        assert!(errors.contains(&DefinitionError::UnknownCapsuleType {
            node_id: "mystery".to_string(),
            node_type: "does-not-exist".to_string(),
        }));
        assert!(errors.contains(&DefinitionError::DuplicateNode {
            node_id: "start".to_string()
        }));
        assert!(errors.contains(&DefinitionError::DanglingEdge {
            edge_id: "pick.value->ghost.in".to_string(),
            node_id: "ghost".to_string(),
        }));
        assert!(errors.iter().any(|e| matches!(
            e,
            DefinitionError::UnknownSlot { slot_id, direction: SlotDirection::Output, .. } if slot_id == "nope"
        )));
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let wf = workflow(
            vec![
                node("a", "text-template", json!({"template": "x"})),
                node("b", "text-template", json!({"template": "y"})),
            ],
            vec![edge("a", "text", "b", "data"), edge("b", "text", "a", "data")],
        );
        let errors = validate_workflow(&wf, &builtin_registry()).unwrap_err();
        assert!(errors.contains(&DefinitionError::Cycle {
            path: vec!["a".to_string(), "b".to_string(), "a".to_string()]
        }));
    }

    #[test]
    fn unbound_and_ambiguous_inputs() {
        let mut wf = pipeline();
        wf.edges.remove(0);
        let errors = validate_workflow(&wf, &builtin_registry()).unwrap_err();
        assert_eq!(
            errors,
            vec![DefinitionError::UnboundInput {
                node_id: "pick".to_string(),
                slot_id: "data".to_string()
            }]
        );

        let mut wf = pipeline();
        wf.variables.push(WorkflowVariable {
            key: "doc".to_string(),
            label: None,
            var_type: VariableType::Json,
            default_value: None,
            options: Vec::new(),
            required: false,
            is_secret: false,
        });
        wf.nodes[1].bindings.push(VariableBinding {
            slot_id: "data".to_string(),
            variable_key: "doc".to_string(),
        });
        let errors = validate_workflow(&wf, &builtin_registry()).unwrap_err();
        assert_eq!(
            errors,
            vec![DefinitionError::AmbiguousInput {
                node_id: "pick".to_string(),
                slot_id: "data".to_string(),
                sources: 2
            }]
        );
    }

    #[test]
    fn binding_satisfies_required_input() {
        let mut wf = workflow(
            vec![node("pick", "json-extractor", json!({"path": "a"}))],
            vec![],
        );
        wf.variables.push(WorkflowVariable {
            key: "doc".to_string(),
            label: None,
            var_type: VariableType::Json,
            default_value: Some(json!({"a": 1})),
            options: Vec::new(),
            required: false,
            is_secret: false,
        });
        wf.nodes[0].bindings.push(VariableBinding {
            slot_id: "data".to_string(),
            variable_key: "doc".to_string(),
        });
        validate_workflow(&wf, &builtin_registry()).unwrap();

        wf.nodes[0].bindings[0].variable_key = "missing".to_string();
        let errors = validate_workflow(&wf, &builtin_registry()).unwrap_err();
        assert!(matches!(errors[0], DefinitionError::UnknownVariable { .. }));
    }

    #[test]
    fn incompatible_slot_types() {
        // report (file) -> json-extractor data (json)
        let wf = workflow(
            vec![
                node("start", "manual-trigger", json!({})),
                node("report", "report-renderer", json!({"title": "t"})),
                node("pick", "json-extractor", json!({"path": "a"})),
            ],
            vec![
                edge("start", "payload", "report", "content"),
                edge("report", "report", "pick", "data"),
            ],
        );
        let errors = validate_workflow(&wf, &builtin_registry()).unwrap_err();
        assert_eq!(
            errors,
            vec![DefinitionError::IncompatibleTypes {
                edge_id: "report.report->pick.data".to_string(),
                source_type: SlotDataType::File,
                target_type: SlotDataType::Json,
            }]
        );
    }

    #[test]
    fn config_retry_and_trigger_problems() {
        let mut wf = pipeline();
        wf.nodes[1].config.remove("path");
        wf.nodes[2].retry = Some(RetryPolicy {
            max_attempts: 0,
            delay_seconds: 0.0,
            backoff: Default::default(),
        });
        wf.triggers = vec![
            WorkflowTrigger {
                trigger_id: "nightly".to_string(),
                enabled: true,
                config: TriggerConfig::Timer {
                    cron: "not a schedule".to_string(),
                    timezone: "UTC".to_string(),
                },
            },
            WorkflowTrigger {
                trigger_id: "hook-1".to_string(),
                enabled: true,
                config: TriggerConfig::Webhook {
                    path: "daily".to_string(),
                    secret_name: None,
                },
            },
            WorkflowTrigger {
                trigger_id: "hook-2".to_string(),
                enabled: true,
                config: TriggerConfig::Webhook {
                    path: "/daily/".to_string(),
                    secret_name: None,
                },
            },
        ];

        let errors = validate_workflow(&wf, &builtin_registry()).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            DefinitionError::InvalidConfig { node_id, field, .. } if node_id == "pick" && field == "path"
        )));
        assert!(errors.contains(&DefinitionError::InvalidRetryPolicy {
            node_id: "report".to_string()
        }));
        let triggers: Vec<_> = errors
            .iter()
            .filter_map(|e| match e {
                DefinitionError::InvalidTrigger { trigger_id, .. } => Some(trigger_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(triggers, vec!["nightly", "hook-2"]);
    }

    #[test]
    fn validation_errors_display_lists_each() {
        let errors = ValidationErrors(vec![
            DefinitionError::EmptyWorkflow,
            DefinitionError::DuplicateVariable {
                key: "k".to_string(),
            },
        ]);
        assert_eq!(
            errors.to_string(),
            "2 definition error(s): workflow has no nodes; duplicate variable 'k'"
        );
    }
}
