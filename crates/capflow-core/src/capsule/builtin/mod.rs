//! Built-in capsule types.

mod http;
mod llm;
mod report;
mod transform;
mod trigger;

use capflow_types::artifact::{ArtifactSlot, SlotDataType};
use capflow_types::capsule::{CapsuleConfigField, ConfigFieldType};

pub use http::HttpRequestCapsule;
pub use llm::LlmAnalyzerCapsule;
pub use report::ReportRendererCapsule;
pub use transform::{DataMergerCapsule, JsonExtractorCapsule, TextTemplateCapsule};
pub use trigger::ManualTriggerCapsule;

use super::box_capsule::BoxCapsule;

/// Every built-in capsule, boxed for the registry.
pub fn all() -> Vec<BoxCapsule> {
    vec![
        BoxCapsule::new(ManualTriggerCapsule::new()),
        BoxCapsule::new(HttpRequestCapsule::new()),
        BoxCapsule::new(LlmAnalyzerCapsule::new()),
        BoxCapsule::new(JsonExtractorCapsule::new()),
        BoxCapsule::new(TextTemplateCapsule::new()),
        BoxCapsule::new(DataMergerCapsule::new()),
        BoxCapsule::new(ReportRendererCapsule::new()),
    ]
}

fn slot(slot_id: &str, name: &str, data_type: SlotDataType, required: bool) -> ArtifactSlot {
    ArtifactSlot::new(slot_id, name, data_type, required)
}

fn field(key: &str, label: &str, field_type: ConfigFieldType) -> CapsuleConfigField {
    CapsuleConfigField {
        key: key.to_string(),
        label: label.to_string(),
        field_type,
        required: false,
        default_value: None,
        options: Vec::new(),
        help_text: None,
    }
}

fn required(mut field: CapsuleConfigField) -> CapsuleConfigField {
    field.required = true;
    field
}

fn with_default(mut field: CapsuleConfigField, value: serde_json::Value) -> CapsuleConfigField {
    field.default_value = Some(value);
    field
}

fn with_options(mut field: CapsuleConfigField, options: &[&str]) -> CapsuleConfigField {
    field.options = options.iter().map(|o| o.to_string()).collect();
    field
}

fn with_help(mut field: CapsuleConfigField, help: &str) -> CapsuleConfigField {
    field.help_text = Some(help.to_string());
    field
}
