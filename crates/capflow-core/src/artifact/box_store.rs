//! BoxBlobStore -- object-safe dynamic dispatch wrapper for `BlobStore`.
//!
//! 1. `BlobStoreDyn` mirrors `BlobStore` with boxed futures
//! 2. Blanket-impl `BlobStoreDyn` for all `T: BlobStore`
//! 3. `BoxBlobStore` wraps `Arc<dyn BlobStoreDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::store::{BlobError, BlobLocation, BlobStore};

pub trait BlobStoreDyn: Send + Sync {
    fn put_boxed<'a>(
        &'a self,
        key: &'a str,
        bytes: Vec<u8>,
        mime_type: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<BlobLocation, BlobError>> + Send + 'a>>;

    fn get_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, BlobError>> + Send + 'a>>;

    fn delete_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BlobError>> + Send + 'a>>;
}

impl<T: BlobStore> BlobStoreDyn for T {
    fn put_boxed<'a>(
        &'a self,
        key: &'a str,
        bytes: Vec<u8>,
        mime_type: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<BlobLocation, BlobError>> + Send + 'a>> {
        Box::pin(self.put(key, bytes, mime_type))
    }

    fn get_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, BlobError>> + Send + 'a>> {
        Box::pin(self.get(key))
    }

    fn delete_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BlobError>> + Send + 'a>> {
        Box::pin(self.delete(key))
    }
}

/// Shared, type-erased blob store. Cloning shares the backend.
#[derive(Clone)]
pub struct BoxBlobStore {
    inner: Arc<dyn BlobStoreDyn>,
}

impl BoxBlobStore {
    pub fn new<T: BlobStore + 'static>(store: T) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>, mime_type: &str) -> Result<BlobLocation, BlobError> {
        self.inner.put_boxed(key, bytes, mime_type).await
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.inner.get_boxed(key).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.inner.delete_boxed(key).await
    }
}

impl std::fmt::Debug for BoxBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxBlobStore").finish_non_exhaustive()
    }
}
