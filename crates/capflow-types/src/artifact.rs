//! Artifact types: typed slots on nodes and the data that flows through them.
//!
//! An `ExecutionArtifact` is owned by the `NodeExecution` that produced it.
//! Downstream consumers hold an `ArtifactRef`, never a copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Typed connection point on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSlot {
    /// Slot ID, unique among a node's inputs (or outputs).
    pub slot_id: String,
    /// Display name.
    pub name: String,
    /// Data type carried by this slot.
    pub data_type: SlotDataType,
    /// Whether an input slot must be fed by an edge or a variable binding.
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ArtifactSlot {
    pub fn new(slot_id: &str, name: &str, data_type: SlotDataType, required: bool) -> Self {
        Self {
            slot_id: slot_id.to_string(),
            name: name.to_string(),
            data_type,
            required,
            description: None,
        }
    }
}

/// Data type of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotDataType {
    Text,
    Json,
    Number,
    Boolean,
    Image,
    File,
    Binary,
    Any,
}

impl SlotDataType {
    /// Whether an input slot of this type can consume output of type `produced`.
    ///
    /// Exact matches and `any` on either side always connect. Beyond that a
    /// small set of widening conversions is declared compatible.
    pub fn accepts(self, produced: SlotDataType) -> bool {
        use SlotDataType::*;

        if self == produced || self == Any || produced == Any {
            return true;
        }
        matches!(
            (self, produced),
            (Text, Json | Number | Boolean)
                | (Json, Text | Number | Boolean)
                | (Binary, Image | File)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Image => "image",
            Self::File => "file",
            Self::Binary => "binary",
            Self::Any => "any",
        }
    }

    /// Default MIME type for content produced on a slot of this type.
    pub fn default_mime_type(self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::Json | Self::Number | Self::Boolean | Self::Any => "application/json",
            Self::Image => "image/png",
            Self::File | Self::Binary => "application/octet-stream",
        }
    }
}

impl std::fmt::Display for SlotDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stored artifacts
// ---------------------------------------------------------------------------

/// A unit of data produced by a node.
///
/// `size_bytes` and `mime_type` are always present regardless of where the
/// payload lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionArtifact {
    pub artifact_id: Uuid,
    pub name: String,
    /// Output slot that produced this artifact.
    pub slot_id: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(flatten)]
    pub storage: ArtifactStorage,
    pub created_at: DateTime<Utc>,
}

impl ExecutionArtifact {
    pub fn is_inline(&self) -> bool {
        matches!(self.storage, ArtifactStorage::Inline { .. })
    }

    /// Inline payload, if this artifact is stored inline.
    pub fn inline_content(&self) -> Option<&serde_json::Value> {
        match &self.storage {
            ArtifactStorage::Inline { inline_content } => Some(inline_content),
            ArtifactStorage::External { .. } => None,
        }
    }
}

/// Where an artifact's payload lives. Exactly one representation is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "storage", rename_all = "snake_case")]
pub enum ArtifactStorage {
    /// Small text or JSON payloads kept on the record itself.
    Inline { inline_content: serde_json::Value },
    /// Large or binary payloads kept in the blob store.
    External { cos_key: String, cos_url: String },
}

/// Reference from a consumer to an artifact produced upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub source_node_id: String,
    pub source_slot_id: String,
    pub artifact_id: Uuid,
}

/// Resolved artifact payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactContent {
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl ArtifactContent {
    pub fn len(&self) -> usize {
        match self {
            Self::Json(serde_json::Value::String(s)) => s.len(),
            Self::Json(value) => value.to_string().len(),
            Self::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Present the payload as JSON. Bytes become a UTF-8 string when valid,
    /// otherwise a placeholder describing the binary size.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Self::Json(value) => value,
            Self::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(text) => serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)),
                Err(e) => serde_json::json!({ "binary_bytes": e.into_bytes().len() }),
            },
        }
    }
}
