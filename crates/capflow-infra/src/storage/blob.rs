//! Local filesystem blob store.
//!
//! Implements the `BlobStore` port from `capflow-core`. Blobs live at
//! `{base_dir}/{key}`; keys are relative `/`-separated paths such as
//! `artifacts/{artifact_id}`. Writes go to a temporary sibling first and are
//! renamed into place, so readers never observe a partial blob.

use std::path::{Component, Path, PathBuf};

use capflow_core::artifact::{BlobError, BlobLocation, BlobStore};
use uuid::Uuid;

pub struct FsBlobStore {
    base_dir: PathBuf,
}

impl FsBlobStore {
    /// Blobs are stored under `base_dir` (created on first write).
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Map a key to a path, rejecting anything that could escape `base_dir`.
    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, mime_type: &str) -> Result<BlobLocation, BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::Io(format!("create {}: {e}", parent.display())))?;
        }

        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        let size = bytes.len();
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| BlobError::Io(format!("write {}: {e}", tmp.display())))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(BlobError::Io(format!("rename into {}: {e}", path.display())));
        }

        tracing::debug!(key, size, mime_type, "blob written");
        Ok(BlobLocation {
            key: key.to_string(),
            url: format!("file://{}", path.display()),
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound(key.to_string())),
            Err(e) => Err(BlobError::Io(format!("read {}: {e}", path.display()))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key, "blob deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::Io(format!("remove {}: {e}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_then_get() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path().join("blobs"));

        let loc = store
            .put("artifacts/report-1", b"%PDF-1.7".to_vec(), "application/pdf")
            .await
            .unwrap();
        assert_eq!(loc.key, "artifacts/report-1");
        assert!(loc.url.starts_with("file://"));
        assert!(tmp.path().join("blobs/artifacts/report-1").exists());
        assert_eq!(store.get("artifacts/report-1").await.unwrap(), b"%PDF-1.7");
    }

    #[tokio::test]
    async fn overwrite_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path().to_path_buf());
        store.put("artifacts/a", b"one".to_vec(), "text/plain").await.unwrap();
        store.put("artifacts/a", b"two".to_vec(), "text/plain").await.unwrap();
        assert_eq!(store.get("artifacts/a").await.unwrap(), b"two");

        // No temporary files are left behind.
        let entries = std::fs::read_dir(tmp.path().join("artifacts")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path().to_path_buf());
        assert!(matches!(store.get("artifacts/none").await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_removes_the_file_and_tolerates_missing_keys() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path().to_path_buf());
        store.put("artifacts/a", b"one".to_vec(), "text/plain").await.unwrap();

        store.delete("artifacts/a").await.unwrap();
        assert!(!tmp.path().join("artifacts/a").exists());
        store.delete("artifacts/a").await.unwrap();
        assert!(matches!(store.delete("../a").await, Err(BlobError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn keys_cannot_escape_base_dir() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path().join("blobs"));
        for key in ["", "../outside", "/etc/passwd", "artifacts/../../x"] {
            assert!(
                matches!(store.put(key, vec![1], "application/octet-stream").await, Err(BlobError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
    }
}
