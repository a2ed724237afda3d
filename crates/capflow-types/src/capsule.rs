//! Capsule catalog types: what node kinds exist and how they are configured.

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactSlot;

/// Grouping used by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleCategory {
    Trigger,
    Processor,
    Output,
}

impl CapsuleCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Processor => "processor",
            Self::Output => "output",
        }
    }
}

impl std::str::FromStr for CapsuleCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trigger" => Ok(Self::Trigger),
            "processor" => Ok(Self::Processor),
            "output" => Ok(Self::Output),
            other => Err(format!("unknown capsule category: '{other}'")),
        }
    }
}

/// Static registry entry for a capsule type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleTypeMeta {
    pub type_key: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub category: CapsuleCategory,
    /// Ordered configuration fields.
    pub config_schema: Vec<CapsuleConfigField>,
    /// Slot templates used when a node declares none.
    pub default_inputs: Vec<ArtifactSlot>,
    pub default_outputs: Vec<ArtifactSlot>,
    /// Whether `test_run` may execute the capsule against mock input.
    pub testable: bool,
}

impl CapsuleTypeMeta {
    pub fn field(&self, key: &str) -> Option<&CapsuleConfigField> {
        self.config_schema.iter().find(|f| f.key == key)
    }
}

/// One configuration field of a capsule type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleConfigField {
    pub key: String,
    pub label: String,
    pub field_type: ConfigFieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    /// Allowed values for `select` fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigFieldType {
    Text,
    Textarea,
    Number,
    Boolean,
    Select,
    Json,
    Url,
    Cron,
}

/// Validation outcome for one configuration field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValidation {
    pub key: String,
    pub provided: bool,
    pub required: bool,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of running a capsule in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestRunStatus {
    /// Config valid and execution succeeded.
    Success,
    /// Config valid but execution failed.
    Failed,
    /// Config invalid; nothing was executed.
    Invalid,
    /// Config valid but the capsule is not testable.
    Skipped,
}

/// Result of `test_run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleTestRunResult {
    pub type_key: String,
    pub status: TestRunStatus,
    pub field_validations: Vec<FieldValidation>,
    /// Output slot ID -> mock payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
}
