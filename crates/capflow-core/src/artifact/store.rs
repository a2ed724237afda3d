//! Blob store port for externally stored artifacts.
//!
//! Uses RPITIT (native async fn in traits). The filesystem implementation
//! lives in capflow-infra; `MemoryBlobStore` serves tests and ephemeral runs.

use std::sync::Arc;

use dashmap::DashMap;

/// Where a blob was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    pub key: String,
    /// Backend URL for the blob (e.g. `file:///...`).
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob key '{0}'")]
    InvalidKey(String),

    #[error("blob storage I/O error: {0}")]
    Io(String),
}

pub trait BlobStore: Send + Sync {
    fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> impl std::future::Future<Output = Result<BlobLocation, BlobError>> + Send;

    fn get(&self, key: &str) -> impl std::future::Future<Output = Result<Vec<u8>, BlobError>> + Send;

    /// Remove a blob. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> impl std::future::Future<Output = Result<(), BlobError>> + Send;
}

/// Blobs kept in process memory. Clones share the same blobs.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _mime_type: &str) -> Result<BlobLocation, BlobError> {
        if key.is_empty() {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        self.blobs.insert(key.to_string(), bytes);
        Ok(BlobLocation {
            key: key.to_string(),
            url: format!("memory://{key}"),
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .get(key)
            .map(|b| b.value().clone())
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.blobs.remove(key);
        Ok(())
    }
}
