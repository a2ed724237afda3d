//! SQLite share link repository implementation.

use capflow_core::repository::share::ShareLinkRepository;
use capflow_types::error::RepositoryError;
use capflow_types::share::{AccessLevel, ShareLink, ShareResourceType};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, from_json, is_unique_violation, parse_datetime, parse_uuid, query_error, to_json};

const SELECT_COLUMNS: &str = "SELECT id, token, resource_type, resource_id, access_level, title, \
     artifacts, revoked, view_count, created_by, created_at, expires_at, last_viewed_at \
     FROM share_links";

/// SQLite-backed share link storage.
pub struct SqliteShareLinkRepository {
    pool: DatabasePool,
}

impl SqliteShareLinkRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct ShareLinkRow {
    id: String,
    token: String,
    resource_type: String,
    resource_id: String,
    access_level: String,
    title: Option<String>,
    artifacts: String,
    revoked: bool,
    view_count: i64,
    created_by: Option<String>,
    created_at: String,
    expires_at: Option<String>,
    last_viewed_at: Option<String>,
}

impl ShareLinkRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            token: row.try_get("token")?,
            resource_type: row.try_get("resource_type")?,
            resource_id: row.try_get("resource_id")?,
            access_level: row.try_get("access_level")?,
            title: row.try_get("title")?,
            artifacts: row.try_get("artifacts")?,
            revoked: row.try_get("revoked")?,
            view_count: row.try_get("view_count")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            last_viewed_at: row.try_get("last_viewed_at")?,
        })
    }

    fn into_link(self) -> Result<ShareLink, RepositoryError> {
        let resource_type = match self.resource_type.as_str() {
            "execution" => ShareResourceType::Execution,
            other => {
                return Err(RepositoryError::Query(format!(
                    "unknown share resource type: '{other}'"
                )));
            }
        };
        let access_level: AccessLevel = self.access_level.parse().map_err(RepositoryError::Query)?;

        Ok(ShareLink {
            id: parse_uuid(&self.id)?,
            token: self.token,
            resource_type,
            resource_id: parse_uuid(&self.resource_id)?,
            access_level,
            title: self.title,
            artifacts: from_json(&self.artifacts, "share link artifacts")?,
            revoked: self.revoked,
            view_count: self.view_count.max(0) as u64,
            created_by: self.created_by,
            created_at: parse_datetime(&self.created_at)?,
            expires_at: self.expires_at.as_deref().map(parse_datetime).transpose()?,
            last_viewed_at: self.last_viewed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

fn link_from_row(row: &SqliteRow) -> Result<ShareLink, RepositoryError> {
    ShareLinkRow::from_row(row).map_err(query_error)?.into_link()
}

fn resource_type_str(resource_type: ShareResourceType) -> &'static str {
    match resource_type {
        ShareResourceType::Execution => "execution",
    }
}

// ---------------------------------------------------------------------------
// ShareLinkRepository impl
// ---------------------------------------------------------------------------

impl ShareLinkRepository for SqliteShareLinkRepository {
    async fn create(&self, link: &ShareLink) -> Result<(), RepositoryError> {
        let artifacts = to_json(&link.artifacts, "share link artifacts")?;

        sqlx::query(
            r#"INSERT INTO share_links
               (id, token, resource_type, resource_id, access_level, title, artifacts,
                revoked, view_count, created_by, created_at, expires_at, last_viewed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(link.id.to_string())
        .bind(&link.token)
        .bind(resource_type_str(link.resource_type))
        .bind(link.resource_id.to_string())
        .bind(link.access_level.as_str())
        .bind(&link.title)
        .bind(&artifacts)
        .bind(link.revoked)
        .bind(link.view_count as i64)
        .bind(&link.created_by)
        .bind(format_datetime(&link.created_at))
        .bind(link.expires_at.as_ref().map(format_datetime))
        .bind(link.last_viewed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!("share token '{}' already exists", link.token))
            } else {
                query_error(e)
            }
        })?;

        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ShareLink>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(link_from_row).transpose()
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<ShareLink>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE token = ?"))
            .bind(token)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(link_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<ShareLink>, RepositoryError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC"))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter().map(link_from_row).collect()
    }

    async fn revoke(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE share_links SET revoked = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_view(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE share_links SET view_count = view_count + 1, last_viewed_at = ? WHERE id = ?",
        )
        .bind(format_datetime(&at))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
