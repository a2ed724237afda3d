//! BoxCapsule -- object-safe dynamic dispatch wrapper for `Capsule`.
//!
//! 1. `CapsuleDyn` is an object-safe mirror of `Capsule` with boxed futures
//! 2. Blanket-impl `CapsuleDyn` for all `T: Capsule`
//! 3. `BoxCapsule` wraps `Box<dyn CapsuleDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use capflow_types::capsule::{CapsuleTypeMeta, FieldValidation};
use serde_json::{Map, Value};

use super::behavior::{Capsule, CapsuleContext, CapsuleOutput, CapsuleRunError};

/// Object-safe version of [`Capsule`] with boxed futures.
pub trait CapsuleDyn: Send + Sync {
    fn meta(&self) -> &CapsuleTypeMeta;

    fn validate_config(&self, config: &Map<String, Value>) -> Vec<FieldValidation>;

    fn execute_boxed<'a>(
        &'a self,
        ctx: CapsuleContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<CapsuleOutput, CapsuleRunError>> + Send + 'a>>;
}

impl<T: Capsule> CapsuleDyn for T {
    fn meta(&self) -> &CapsuleTypeMeta {
        Capsule::meta(self)
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Vec<FieldValidation> {
        Capsule::validate_config(self, config)
    }

    fn execute_boxed<'a>(
        &'a self,
        ctx: CapsuleContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<CapsuleOutput, CapsuleRunError>> + Send + 'a>> {
        Box::pin(self.execute(ctx))
    }
}

/// Type-erased capsule stored in the registry's lookup table.
pub struct BoxCapsule {
    inner: Box<dyn CapsuleDyn>,
}

impl BoxCapsule {
    pub fn new<T: Capsule + 'static>(capsule: T) -> Self {
        Self {
            inner: Box::new(capsule),
        }
    }

    pub fn meta(&self) -> &CapsuleTypeMeta {
        self.inner.meta()
    }

    pub fn type_key(&self) -> &str {
        &self.inner.meta().type_key
    }

    pub fn validate_config(&self, config: &Map<String, Value>) -> Vec<FieldValidation> {
        self.inner.validate_config(config)
    }

    pub async fn execute(&self, ctx: CapsuleContext<'_>) -> Result<CapsuleOutput, CapsuleRunError> {
        self.inner.execute_boxed(ctx).await
    }
}

impl std::fmt::Debug for BoxCapsule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxCapsule")
            .field("type_key", &self.type_key())
            .finish()
    }
}
