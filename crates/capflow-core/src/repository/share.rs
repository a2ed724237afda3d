//! Share link repository trait definition.

use capflow_types::error::RepositoryError;
use capflow_types::share::ShareLink;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub trait ShareLinkRepository: Send + Sync {
    /// Insert a new link. A duplicate token is a `Conflict`.
    fn create(
        &self,
        link: &ShareLink,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ShareLink>, RepositoryError>> + Send;

    fn get_by_token(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Option<ShareLink>, RepositoryError>> + Send;

    /// All links, newest first (revoked ones included).
    fn list(&self) -> impl std::future::Future<Output = Result<Vec<ShareLink>, RepositoryError>> + Send;

    /// Mark revoked. Returns `false` if the link does not exist.
    fn revoke(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Increment the view count and stamp `last_viewed_at`.
    fn record_view(
        &self,
        id: &Uuid,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
