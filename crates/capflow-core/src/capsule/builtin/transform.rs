//! Pure data-shaping capsules: no external services involved.

use capflow_types::artifact::SlotDataType;
use capflow_types::capsule::{CapsuleCategory, CapsuleTypeMeta, ConfigFieldType};
use serde_json::{Map, Value, json};

use super::{field, required, slot, with_default, with_help, with_options};
use crate::capsule::behavior::{Capsule, CapsuleContext, CapsuleOutput, CapsuleRunError};
use crate::capsule::template::{TemplateScope, json_child};

// ---------------------------------------------------------------------------
// json-extractor
// ---------------------------------------------------------------------------

/// Picks a value out of a JSON document by dotted path.
pub struct JsonExtractorCapsule {
    meta: CapsuleTypeMeta,
}

impl JsonExtractorCapsule {
    pub const TYPE_KEY: &'static str = "json-extractor";

    pub fn new() -> Self {
        Self {
            meta: CapsuleTypeMeta {
                type_key: Self::TYPE_KEY.to_string(),
                name: "JSON Extractor".to_string(),
                description: "Extracts a value from JSON by path".to_string(),
                icon: "brackets".to_string(),
                category: CapsuleCategory::Processor,
                config_schema: vec![
                    with_help(
                        required(field("path", "Path", ConfigFieldType::Text)),
                        "Dotted keys and array indices, e.g. items.0.title",
                    ),
                    with_help(
                        field("default_value", "Default value", ConfigFieldType::Json),
                        "Emitted when the path does not exist",
                    ),
                ],
                default_inputs: vec![slot("data", "Data", SlotDataType::Json, true)],
                default_outputs: vec![slot("value", "Value", SlotDataType::Any, false)],
                testable: true,
            },
        }
    }
}

impl Default for JsonExtractorCapsule {
    fn default() -> Self {
        Self::new()
    }
}

impl Capsule for JsonExtractorCapsule {
    fn meta(&self) -> &CapsuleTypeMeta {
        &self.meta
    }

    async fn execute(&self, ctx: CapsuleContext<'_>) -> Result<CapsuleOutput, CapsuleRunError> {
        let path = ctx.require_str("path")?;
        let data = ctx
            .input_json("data")
            .ok_or_else(|| CapsuleRunError::MissingInput("data".to_string()))?;

        let found = path
            .split('.')
            .filter(|p| !p.is_empty())
            .try_fold(data, |value, key| json_child(&value, key));

        match (found, ctx.config.get("default_value")) {
            (Some(value), _) => Ok(CapsuleOutput::new()
                .with_json("value", value)
                .log(format!("extracted '{path}'"))),
            (None, Some(default)) if !default.is_null() => Ok(CapsuleOutput::new()
                .with_json("value", default.clone())
                .log(format!("'{path}' not found, emitted default"))),
            (None, _) => Err(CapsuleRunError::Failed(format!("path '{path}' not found"))),
        }
    }
}

// ---------------------------------------------------------------------------
// text-template
// ---------------------------------------------------------------------------

/// Renders a text template against inputs and variables.
pub struct TextTemplateCapsule {
    meta: CapsuleTypeMeta,
}

impl TextTemplateCapsule {
    pub const TYPE_KEY: &'static str = "text-template";

    pub fn new() -> Self {
        Self {
            meta: CapsuleTypeMeta {
                type_key: Self::TYPE_KEY.to_string(),
                name: "Text Template".to_string(),
                description: "Renders text with {{inputs.x}} and {{vars.x}} placeholders"
                    .to_string(),
                icon: "text".to_string(),
                category: CapsuleCategory::Processor,
                config_schema: vec![required(field(
                    "template",
                    "Template",
                    ConfigFieldType::Textarea,
                ))],
                default_inputs: vec![slot("data", "Data", SlotDataType::Any, false)],
                default_outputs: vec![slot("text", "Text", SlotDataType::Text, false)],
                testable: true,
            },
        }
    }
}

impl Default for TextTemplateCapsule {
    fn default() -> Self {
        Self::new()
    }
}

impl Capsule for TextTemplateCapsule {
    fn meta(&self) -> &CapsuleTypeMeta {
        &self.meta
    }

    async fn execute(&self, ctx: CapsuleContext<'_>) -> Result<CapsuleOutput, CapsuleRunError> {
        let template = ctx.require_str("template")?;
        let scope = TemplateScope {
            inputs: ctx.inputs,
            variables: ctx.variables,
        };
        let text = scope.render(template);
        let len = text.len();
        Ok(CapsuleOutput::new()
            .with_text("text", text, "text/plain")
            .log(format!("rendered {len} bytes")))
    }
}

// ---------------------------------------------------------------------------
// data-merger
// ---------------------------------------------------------------------------

const MERGE_SLOTS: [&str; 3] = ["a", "b", "c"];

/// Combines up to three upstream payloads into one JSON value.
pub struct DataMergerCapsule {
    meta: CapsuleTypeMeta,
}

impl DataMergerCapsule {
    pub const TYPE_KEY: &'static str = "data-merger";

    pub fn new() -> Self {
        Self {
            meta: CapsuleTypeMeta {
                type_key: Self::TYPE_KEY.to_string(),
                name: "Data Merger".to_string(),
                description: "Merges several inputs into one JSON value".to_string(),
                icon: "merge".to_string(),
                category: CapsuleCategory::Processor,
                config_schema: vec![with_help(
                    with_options(
                        with_default(field("strategy", "Strategy", ConfigFieldType::Select), json!("object")),
                        &["object", "array"],
                    ),
                    "object: shallow-merge objects (others keyed by slot); array: list in slot order",
                )],
                default_inputs: vec![
                    slot("a", "Input A", SlotDataType::Any, true),
                    slot("b", "Input B", SlotDataType::Any, false),
                    slot("c", "Input C", SlotDataType::Any, false),
                ],
                default_outputs: vec![slot("merged", "Merged", SlotDataType::Json, false)],
                testable: true,
            },
        }
    }
}

impl Default for DataMergerCapsule {
    fn default() -> Self {
        Self::new()
    }
}

impl Capsule for DataMergerCapsule {
    fn meta(&self) -> &CapsuleTypeMeta {
        &self.meta
    }

    async fn execute(&self, ctx: CapsuleContext<'_>) -> Result<CapsuleOutput, CapsuleRunError> {
        // Slots beyond the default three are merged too, after them, by name.
        let mut slot_ids: Vec<&str> = MERGE_SLOTS
            .iter()
            .copied()
            .filter(|s| ctx.inputs.contains_key(*s))
            .collect();
        let mut extra: Vec<&str> = ctx
            .inputs
            .keys()
            .map(String::as_str)
            .filter(|k| !MERGE_SLOTS.contains(k))
            .collect();
        extra.sort_unstable();
        slot_ids.extend(extra);

        if slot_ids.is_empty() {
            return Err(CapsuleRunError::MissingInput("a".to_string()));
        }

        let values: Vec<(&str, Value)> = slot_ids
            .iter()
            .filter_map(|s| ctx.input_json(s).map(|v| (*s, v)))
            .collect();

        let merged = match ctx.config_str("strategy").unwrap_or("object") {
            "array" => Value::Array(values.into_iter().map(|(_, v)| v).collect()),
            "object" => {
                let all_objects = values.iter().all(|(_, v)| v.is_object());
                let mut out = Map::new();
                for (slot_id, value) in values {
                    match value {
                        Value::Object(map) if all_objects => out.extend(map),
                        other => {
                            out.insert(slot_id.to_string(), other);
                        }
                    }
                }
                Value::Object(out)
            }
            other => {
                return Err(CapsuleRunError::Config(format!("unknown strategy '{other}'")));
            }
        };

        Ok(CapsuleOutput::new()
            .with_json("merged", merged)
            .log(format!("merged {} inputs", slot_ids.len())))
    }
}
