//! Artifact resolver: decides inline vs external storage and resolves
//! slot-to-slot references.
//!
//! Small text-like payloads stay on the `ExecutionArtifact` itself. Anything
//! larger than the configured threshold, and every binary payload, goes to
//! the injected blob store under `artifacts/{artifact_id}`. Stored artifacts
//! are never modified afterwards.

pub mod box_store;
pub mod store;

use capflow_types::artifact::{ArtifactContent, ArtifactRef, ArtifactStorage, ExecutionArtifact};
use capflow_types::execution::WorkflowExecution;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

pub use box_store::BoxBlobStore;
pub use store::{BlobError, BlobLocation, BlobStore, MemoryBlobStore};

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact storage failed: {0}")]
    Storage(#[from] BlobError),

    #[error("artifact {artifact_id} not found on node '{node_id}'")]
    UnknownRef { node_id: String, artifact_id: Uuid },

    #[error("artifact payload could not be encoded: {0}")]
    Encode(String),
}

/// Content waiting to be stored as an artifact.
#[derive(Debug, Clone)]
pub struct ArtifactDraft {
    pub name: String,
    pub slot_id: String,
    pub mime_type: String,
    pub content: ArtifactContent,
}

/// MIME types whose payload can live inline as JSON.
pub fn is_text_like(mime_type: &str) -> bool {
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    essence.starts_with("text/")
        || essence == "application/json"
        || essence.ends_with("+json")
        || essence == "application/x-ndjson"
}

fn is_json_mime(mime_type: &str) -> bool {
    is_text_like(mime_type) && !mime_type.trim_start().starts_with("text/")
}

#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    store: BoxBlobStore,
    inline_threshold_bytes: usize,
}

impl ArtifactResolver {
    pub fn new(store: BoxBlobStore, inline_threshold_bytes: usize) -> Self {
        Self {
            store,
            inline_threshold_bytes,
        }
    }

    pub fn inline_threshold_bytes(&self) -> usize {
        self.inline_threshold_bytes
    }

    /// Store `draft`, choosing inline or external representation.
    pub async fn store(&self, draft: ArtifactDraft) -> Result<ExecutionArtifact, ArtifactError> {
        let artifact_id = Uuid::now_v7();
        let size = draft.content.len();

        let storage = match draft.content {
            ArtifactContent::Json(value)
                if size <= self.inline_threshold_bytes && is_text_like(&draft.mime_type) =>
            {
                ArtifactStorage::Inline {
                    inline_content: value,
                }
            }
            content => {
                let bytes = match content {
                    ArtifactContent::Json(Value::String(text)) if !is_json_mime(&draft.mime_type) => {
                        text.into_bytes()
                    }
                    ArtifactContent::Json(value) => {
                        serde_json::to_vec(&value).map_err(|e| ArtifactError::Encode(e.to_string()))?
                    }
                    ArtifactContent::Bytes(bytes) => bytes,
                };
                let key = format!("artifacts/{artifact_id}");
                let location = self.store.put(&key, bytes, &draft.mime_type).await?;
                tracing::debug!(%artifact_id, key = %location.key, size, "artifact stored externally");
                ArtifactStorage::External {
                    cos_key: location.key,
                    cos_url: location.url,
                }
            }
        };

        Ok(ExecutionArtifact {
            artifact_id,
            name: draft.name,
            slot_id: draft.slot_id,
            mime_type: draft.mime_type,
            size_bytes: size as u64,
            storage,
            created_at: Utc::now(),
        })
    }

    /// Fetch an artifact's payload. Inline content is returned as is.
    pub async fn resolve(&self, artifact: &ExecutionArtifact) -> Result<ArtifactContent, ArtifactError> {
        match &artifact.storage {
            ArtifactStorage::Inline { inline_content } => Ok(ArtifactContent::Json(inline_content.clone())),
            ArtifactStorage::External { cos_key, .. } => {
                let bytes = self.store.get(cos_key).await?;
                Ok(decode_external(&artifact.mime_type, bytes))
            }
        }
    }

    /// Remove an externally stored artifact's blob. Inline artifacts have
    /// nothing to remove.
    pub async fn discard(&self, artifact: &ExecutionArtifact) -> Result<(), ArtifactError> {
        if let ArtifactStorage::External { cos_key, .. } = &artifact.storage {
            self.store.delete(cos_key).await?;
        }
        Ok(())
    }

    /// Resolve a reference against the producing node's outputs.
    pub async fn resolve_ref(
        &self,
        reference: &ArtifactRef,
        execution: &WorkflowExecution,
    ) -> Result<ArtifactContent, ArtifactError> {
        let artifact = execution
            .node(&reference.source_node_id)
            .and_then(|n| {
                n.output_artifacts
                    .iter()
                    .find(|a| a.artifact_id == reference.artifact_id)
            })
            .ok_or_else(|| ArtifactError::UnknownRef {
                node_id: reference.source_node_id.clone(),
                artifact_id: reference.artifact_id,
            })?;
        self.resolve(artifact).await
    }
}

/// External bytes back to content: JSON for JSON types, strings for text,
/// raw bytes otherwise.
fn decode_external(mime_type: &str, bytes: Vec<u8>) -> ArtifactContent {
    if !is_text_like(mime_type) {
        return ArtifactContent::Bytes(bytes);
    }
    let is_json = is_json_mime(mime_type);
    match String::from_utf8(bytes) {
        Ok(text) if is_json => match serde_json::from_str(&text) {
            Ok(value) => ArtifactContent::Json(value),
            Err(_) => ArtifactContent::Json(Value::String(text)),
        },
        Ok(text) => ArtifactContent::Json(Value::String(text)),
        Err(e) => ArtifactContent::Bytes(e.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver(threshold: usize) -> (ArtifactResolver, MemoryBlobStore) {
        let store = MemoryBlobStore::new();
        (
            ArtifactResolver::new(BoxBlobStore::new(store.clone()), threshold),
            store,
        )
    }

    fn draft(content: ArtifactContent, mime: &str) -> ArtifactDraft {
        ArtifactDraft {
            name: "out".to_string(),
            slot_id: "out".to_string(),
            mime_type: mime.to_string(),
            content,
        }
    }

    #[tokio::test]
    async fn small_json_is_inline() {
        let (resolver, store) = resolver(1024);
        let artifact = resolver
            .store(draft(ArtifactContent::Json(json!({"a": 1})), "application/json"))
            .await
            .unwrap();
        assert!(artifact.is_inline());
        assert_eq!(artifact.size_bytes, 7);
        assert!(store.is_empty());
        assert_eq!(
            resolver.resolve(&artifact).await.unwrap(),
            ArtifactContent::Json(json!({"a": 1}))
        );
    }

    #[tokio::test]
    async fn large_text_goes_external_and_resolves_back() {
        let (resolver, store) = resolver(8);
        let text = "a fairly long report body".to_string();
        let artifact = resolver
            .store(draft(ArtifactContent::Json(json!(text.clone())), "text/markdown"))
            .await
            .unwrap();
        match &artifact.storage {
            ArtifactStorage::External { cos_key, .. } => {
                assert_eq!(cos_key, &format!("artifacts/{}", artifact.artifact_id));
            }
            other => panic!("expected external storage, got {other:?}"),
        }
        assert_eq!(artifact.size_bytes, text.len() as u64);
        assert_eq!(store.len(), 1);
        assert_eq!(
            resolver.resolve(&artifact).await.unwrap(),
            ArtifactContent::Json(json!(text))
        );
    }

    #[tokio::test]
    async fn binary_is_always_external() {
        let (resolver, _) = resolver(1 << 20);
        let artifact = resolver
            .store(draft(ArtifactContent::Bytes(vec![0, 159, 146, 150]), "image/png"))
            .await
            .unwrap();
        assert!(!artifact.is_inline());
        assert_eq!(
            resolver.resolve(&artifact).await.unwrap(),
            ArtifactContent::Bytes(vec![0, 159, 146, 150])
        );
    }

    #[tokio::test]
    async fn missing_blob_surfaces_as_error() {
        let (resolver, _) = resolver(0);
        let artifact = ExecutionArtifact {
            artifact_id: Uuid::now_v7(),
            name: "gone".to_string(),
            slot_id: "out".to_string(),
            mime_type: "text/plain".to_string(),
            size_bytes: 3,
            storage: ArtifactStorage::External {
                cos_key: "artifacts/gone".to_string(),
                cos_url: "memory://artifacts/gone".to_string(),
            },
            created_at: Utc::now(),
        };
        assert!(matches!(
            resolver.resolve(&artifact).await,
            Err(ArtifactError::Storage(BlobError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn discard_removes_external_blob_only() {
        let (resolver, store) = resolver(4);
        let inline = resolver
            .store(draft(ArtifactContent::Json(json!(1)), "application/json"))
            .await
            .unwrap();
        let external = resolver
            .store(draft(ArtifactContent::Bytes(vec![1, 2, 3]), "image/png"))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        resolver.discard(&inline).await.unwrap();
        assert_eq!(store.len(), 1);
        resolver.discard(&external).await.unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn text_like_mime_types() {
        assert!(is_text_like("text/plain; charset=utf-8"));
        assert!(is_text_like("application/json"));
        assert!(is_text_like("application/ld+json"));
        assert!(!is_text_like("application/octet-stream"));
        assert!(!is_text_like("image/png"));
    }
}
