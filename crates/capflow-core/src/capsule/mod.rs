//! Capsule type registry: what node kinds exist and how to validate and
//! simulate them.
//!
//! - `behavior` -- the `Capsule` trait and its execution context
//! - `box_capsule` -- object-safe wrapper used by the registry
//! - `builtin` -- the capsule types shipped with capflow
//! - `schema` -- config validation against `CapsuleTypeMeta::config_schema`
//! - `services` -- external backends reachable from capsule bodies
//! - `template` -- `{{ path }}` substitution in config strings

pub mod behavior;
pub mod box_capsule;
pub mod builtin;
pub mod schema;
pub mod services;
pub mod template;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use capflow_types::artifact::{ArtifactContent, SlotDataType};
use capflow_types::capsule::{
    CapsuleCategory, CapsuleTestRunResult, CapsuleTypeMeta, FieldValidation, TestRunStatus,
};
use serde_json::{Map, Value, json};

pub use behavior::{Capsule, CapsuleContext, CapsuleOutput, CapsuleRunError, SlotOutput};
pub use box_capsule::BoxCapsule;
pub use services::{CapsuleServices, SimulatedServices};

/// Registry lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapsuleError {
    #[error("unknown capsule type '{0}'")]
    UnknownType(String),
}

// ---------------------------------------------------------------------------
// CapsuleRegistry
// ---------------------------------------------------------------------------

/// Lookup table of capsule types keyed by type key.
///
/// Built once and shared read-only; executions never mutate it.
#[derive(Debug, Default)]
pub struct CapsuleRegistry {
    capsules: BTreeMap<String, BoxCapsule>,
}

impl CapsuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in capsule type.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for capsule in builtin::all() {
            registry.register(capsule);
        }
        registry
    }

    /// Register a capsule type, returning the one it replaced, if any.
    pub fn register(&mut self, capsule: BoxCapsule) -> Option<BoxCapsule> {
        self.capsules.insert(capsule.type_key().to_string(), capsule)
    }

    pub fn get(&self, type_key: &str) -> Option<&BoxCapsule> {
        self.capsules.get(type_key)
    }

    pub fn contains(&self, type_key: &str) -> bool {
        self.capsules.contains_key(type_key)
    }

    pub fn len(&self) -> usize {
        self.capsules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capsules.is_empty()
    }

    /// All types, optionally filtered by category, sorted by category then key.
    pub fn list_types(&self, category: Option<CapsuleCategory>) -> Vec<CapsuleTypeMeta> {
        let mut types: Vec<CapsuleTypeMeta> = self
            .capsules
            .values()
            .map(BoxCapsule::meta)
            .filter(|meta| category.is_none_or(|c| meta.category == c))
            .cloned()
            .collect();
        types.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.type_key.cmp(&b.type_key))
        });
        types
    }

    pub fn get_type(&self, type_key: &str) -> Result<&CapsuleTypeMeta, CapsuleError> {
        self.lookup(type_key).map(BoxCapsule::meta)
    }

    pub fn validate_config(
        &self,
        type_key: &str,
        config: &Map<String, Value>,
    ) -> Result<Vec<FieldValidation>, CapsuleError> {
        Ok(self.lookup(type_key)?.validate_config(config))
    }

    /// Validate `config`, then run the capsule once against `mock_input`
    /// with [`SimulatedServices`].
    ///
    /// Keys of `mock_input` that name an input slot become that slot's
    /// payload; every other key is passed as a variable. Required input
    /// slots absent from `mock_input` receive a sample value of their type.
    pub async fn test_run(
        &self,
        type_key: &str,
        config: &Map<String, Value>,
        mock_input: &Value,
    ) -> Result<CapsuleTestRunResult, CapsuleError> {
        let capsule = self.lookup(type_key)?;
        let meta = capsule.meta();
        let started = Instant::now();

        let field_validations = capsule.validate_config(config);
        let mut result = CapsuleTestRunResult {
            type_key: type_key.to_string(),
            status: TestRunStatus::Success,
            field_validations,
            output: None,
            logs: Vec::new(),
            error_message: None,
            duration_ms: 0,
        };

        if !schema::all_valid(&result.field_validations) {
            result.status = TestRunStatus::Invalid;
            result.error_message = Some("configuration is invalid".to_string());
            return Ok(result);
        }
        if !meta.testable {
            result.status = TestRunStatus::Skipped;
            result.logs.push(format!("{type_key} does not support test runs"));
            return Ok(result);
        }

        let (inputs, variables) = split_mock_input(meta, mock_input);
        let config = schema::apply_defaults(meta, config);
        let outcome = capsule
            .execute(CapsuleContext {
                node_id: "test-run",
                config: &config,
                inputs: &inputs,
                variables: &variables,
                services: &SimulatedServices,
            })
            .await;

        match outcome {
            Ok(output) => {
                result.output = Some(output.to_json());
                result.logs = output.logs;
            }
            Err(e) => {
                result.status = TestRunStatus::Failed;
                result.error_message = Some(e.to_string());
            }
        }
        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::debug!(
            type_key,
            status = ?result.status,
            duration_ms = result.duration_ms,
            "capsule test run finished"
        );
        Ok(result)
    }

    fn lookup(&self, type_key: &str) -> Result<&BoxCapsule, CapsuleError> {
        self.capsules
            .get(type_key)
            .ok_or_else(|| CapsuleError::UnknownType(type_key.to_string()))
    }
}

fn split_mock_input(
    meta: &CapsuleTypeMeta,
    mock_input: &Value,
) -> (HashMap<String, ArtifactContent>, Map<String, Value>) {
    let mut inputs = HashMap::new();
    let mut variables = Map::new();

    if let Value::Object(map) = mock_input {
        for (key, value) in map {
            if meta.default_inputs.iter().any(|s| &s.slot_id == key) {
                inputs.insert(key.clone(), ArtifactContent::Json(value.clone()));
            } else {
                variables.insert(key.clone(), value.clone());
            }
        }
    }

    for slot in meta.default_inputs.iter().filter(|s| s.required) {
        inputs
            .entry(slot.slot_id.clone())
            .or_insert_with(|| sample_content(slot.data_type));
    }
    (inputs, variables)
}

fn sample_content(data_type: SlotDataType) -> ArtifactContent {
    match data_type {
        SlotDataType::Text => ArtifactContent::Json(json!("Sample text for a test run.")),
        SlotDataType::Number => ArtifactContent::Json(json!(42)),
        SlotDataType::Boolean => ArtifactContent::Json(json!(true)),
        SlotDataType::Json | SlotDataType::Any => {
            ArtifactContent::Json(json!({"sample": true, "items": [1, 2, 3]}))
        }
        SlotDataType::Image | SlotDataType::File | SlotDataType::Binary => {
            ArtifactContent::Bytes(b"sample".to_vec())
        }
    }
}

static BUILTIN_REGISTRY: OnceLock<Arc<CapsuleRegistry>> = OnceLock::new();

/// Process-wide registry of the built-in capsule types.
pub fn builtin_registry() -> Arc<CapsuleRegistry> {
    BUILTIN_REGISTRY
        .get_or_init(|| Arc::new(CapsuleRegistry::with_builtins()))
        .clone()
}
