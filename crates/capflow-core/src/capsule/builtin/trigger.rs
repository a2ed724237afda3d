use capflow_types::artifact::SlotDataType;
use capflow_types::capsule::{CapsuleCategory, CapsuleTypeMeta, ConfigFieldType};
use serde_json::Value;

use super::{field, slot, with_help};
use crate::capsule::behavior::{Capsule, CapsuleContext, CapsuleOutput, CapsuleRunError};

/// Entry node that emits the execution's bound variables as its payload.
pub struct ManualTriggerCapsule {
    meta: CapsuleTypeMeta,
}

impl ManualTriggerCapsule {
    pub const TYPE_KEY: &'static str = "manual-trigger";

    pub fn new() -> Self {
        Self {
            meta: CapsuleTypeMeta {
                type_key: Self::TYPE_KEY.to_string(),
                name: "Manual Trigger".to_string(),
                description: "Starts the pipeline and passes run variables downstream".to_string(),
                icon: "play".to_string(),
                category: CapsuleCategory::Trigger,
                config_schema: vec![with_help(
                    field("payload", "Static payload", ConfigFieldType::Json),
                    "Merged under the run variables",
                )],
                default_inputs: Vec::new(),
                default_outputs: vec![slot("payload", "Payload", SlotDataType::Json, false)],
                testable: true,
            },
        }
    }
}

impl Default for ManualTriggerCapsule {
    fn default() -> Self {
        Self::new()
    }
}

impl Capsule for ManualTriggerCapsule {
    fn meta(&self) -> &CapsuleTypeMeta {
        &self.meta
    }

    async fn execute(&self, ctx: CapsuleContext<'_>) -> Result<CapsuleOutput, CapsuleRunError> {
        let mut payload = match ctx.config.get("payload") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::String(s)) if !s.trim().is_empty() => serde_json::from_str(s)
                .map_err(|e| CapsuleRunError::Config(format!("payload is not a JSON object: {e}")))?,
            _ => serde_json::Map::new(),
        };
        for (key, value) in ctx.variables {
            payload.insert(key.clone(), value.clone());
        }
        let count = payload.len();
        Ok(CapsuleOutput::new()
            .with_json("payload", Value::Object(payload))
            .log(format!("emitted {count} payload fields")))
    }
}
