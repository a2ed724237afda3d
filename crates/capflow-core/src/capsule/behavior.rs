//! The `Capsule` trait: behavior and validation for one node type.

use std::collections::HashMap;
use std::future::Future;

use capflow_types::artifact::ArtifactContent;
use capflow_types::capsule::{CapsuleTypeMeta, FieldValidation};
use serde_json::{Map, Value};

use super::schema;
use super::services::{CapsuleServices, ServiceError};

/// Everything a capsule sees while executing one attempt.
pub struct CapsuleContext<'a> {
    pub node_id: &'a str,
    pub config: &'a Map<String, Value>,
    /// Resolved input payloads keyed by input slot ID.
    pub inputs: &'a HashMap<String, ArtifactContent>,
    pub variables: &'a Map<String, Value>,
    pub services: &'a dyn CapsuleServices,
}

impl CapsuleContext<'_> {
    pub fn input(&self, slot_id: &str) -> Option<&ArtifactContent> {
        self.inputs.get(slot_id)
    }

    /// Input payload as JSON (bytes are decoded where possible).
    pub fn input_json(&self, slot_id: &str) -> Option<Value> {
        self.inputs.get(slot_id).cloned().map(ArtifactContent::into_json)
    }

    /// Input payload rendered as text. JSON strings are unquoted.
    pub fn input_text(&self, slot_id: &str) -> Option<String> {
        self.input_json(slot_id).map(|v| value_to_text(&v))
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Required string config value.
    pub fn require_str(&self, key: &str) -> Result<&str, CapsuleRunError> {
        self.config_str(key)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| CapsuleRunError::Config(format!("'{key}' is required")))
    }
}

/// Render a JSON value as plain text.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One payload emitted on an output slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotOutput {
    pub slot_id: String,
    pub content: ArtifactContent,
    /// Overrides the slot type's default MIME type.
    pub mime_type: Option<String>,
}

/// Result of a successful attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapsuleOutput {
    pub slots: Vec<SlotOutput>,
    pub logs: Vec<String>,
}

impl CapsuleOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(mut self, slot_id: &str, value: Value) -> Self {
        self.slots.push(SlotOutput {
            slot_id: slot_id.to_string(),
            content: ArtifactContent::Json(value),
            mime_type: None,
        });
        self
    }

    pub fn with_text(mut self, slot_id: &str, text: impl Into<String>, mime_type: &str) -> Self {
        self.slots.push(SlotOutput {
            slot_id: slot_id.to_string(),
            content: ArtifactContent::Json(Value::String(text.into())),
            mime_type: Some(mime_type.to_string()),
        });
        self
    }

    pub fn log(mut self, message: impl Into<String>) -> Self {
        self.logs.push(message.into());
        self
    }

    pub fn get(&self, slot_id: &str) -> Option<&ArtifactContent> {
        self.slots
            .iter()
            .find(|s| s.slot_id == slot_id)
            .map(|s| &s.content)
    }

    /// Slot ID -> JSON payload, used for test run reports.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .slots
            .iter()
            .map(|s| (s.slot_id.clone(), s.content.clone().into_json()))
            .collect();
        Value::Object(map)
    }
}

/// Why an attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum CapsuleRunError {
    #[error("{0}")]
    Failed(String),

    #[error("missing input '{0}'")]
    MissingInput(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Behavior of one capsule type.
///
/// Uses native async fn in traits; `BoxCapsule` provides dynamic dispatch.
pub trait Capsule: Send + Sync {
    fn meta(&self) -> &CapsuleTypeMeta;

    /// Validate a node configuration against this capsule's schema.
    fn validate_config(&self, config: &Map<String, Value>) -> Vec<FieldValidation> {
        schema::validate_fields(self.meta(), config)
    }

    fn execute(
        &self,
        ctx: CapsuleContext<'_>,
    ) -> impl Future<Output = Result<CapsuleOutput, CapsuleRunError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_builder_collects_slots() {
        let output = CapsuleOutput::new()
            .with_json("data", json!({"a": 1}))
            .with_text("text", "hello", "text/plain")
            .log("done");
        assert_eq!(output.slots.len(), 2);
        assert_eq!(output.logs, vec!["done".to_string()]);
        assert_eq!(output.get("data"), Some(&ArtifactContent::Json(json!({"a": 1}))));
        assert_eq!(output.to_json(), json!({"data": {"a": 1}, "text": "hello"}));
    }

    #[test]
    fn value_to_text_unquotes_strings() {
        assert_eq!(value_to_text(&json!("abc")), "abc");
        assert_eq!(value_to_text(&json!(3)), "3");
        assert_eq!(value_to_text(&Value::Null), "");
    }
}
