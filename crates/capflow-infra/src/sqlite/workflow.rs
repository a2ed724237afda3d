//! SQLite workflow repository implementation.

use capflow_core::repository::workflow::WorkflowRepository;
use capflow_core::repository::{Page, PageRequest};
use capflow_types::error::RepositoryError;
use capflow_types::workflow::Workflow;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, from_json, parse_uuid, query_error, to_json};

/// SQLite-backed workflow definition storage.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Internal row type; the definition column holds the whole workflow.
struct WorkflowRow {
    id: String,
    definition: String,
}

impl WorkflowRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            definition: row.try_get("definition")?,
        })
    }

    fn into_workflow(self) -> Result<Workflow, RepositoryError> {
        let workflow: Workflow = from_json(&self.definition, "workflow definition")?;
        // The id column is authoritative.
        let id = parse_uuid(&self.id)?;
        if workflow.id != id {
            return Err(RepositoryError::Query(format!(
                "workflow row {id} holds definition for {}",
                workflow.id
            )));
        }
        Ok(workflow)
    }
}

fn rows_to_workflows(rows: &[SqliteRow]) -> Result<Vec<Workflow>, RepositoryError> {
    rows.iter()
        .map(|row| {
            WorkflowRow::from_row(row)
                .map_err(query_error)?
                .into_workflow()
        })
        .collect()
}

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let definition = to_json(workflow, "workflow definition")?;
        let tags = to_json(&workflow.tags, "workflow tags")?;

        sqlx::query(
            r#"INSERT INTO workflows (id, name, version, tags, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 version = excluded.version,
                 tags = excluded.tags,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(i64::from(workflow.version))
        .bind(&tags)
        .bind(&definition)
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT id, definition FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = WorkflowRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_workflow()?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, tag: Option<&str>, page: PageRequest) -> Result<Page<Workflow>, RepositoryError> {
        let limit = i64::from(page.page_size);
        let offset = page.offset() as i64;

        let (total, rows) = match tag {
            Some(tag) => {
                let tag_clause =
                    "EXISTS (SELECT 1 FROM json_each(workflows.tags) WHERE json_each.value = ?)";
                let total: i64 =
                    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM workflows WHERE {tag_clause}"))
                        .bind(tag)
                        .fetch_one(&self.pool.reader)
                        .await
                        .map_err(query_error)?;
                let rows = sqlx::query(&format!(
                    "SELECT id, definition FROM workflows WHERE {tag_clause} \
                     ORDER BY updated_at DESC, id DESC LIMIT ? OFFSET ?"
                ))
                .bind(tag)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool.reader)
                .await
                .map_err(query_error)?;
                (total, rows)
            }
            None => {
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workflows")
                    .fetch_one(&self.pool.reader)
                    .await
                    .map_err(query_error)?;
                let rows = sqlx::query(
                    "SELECT id, definition FROM workflows ORDER BY updated_at DESC, id DESC LIMIT ? OFFSET ?",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool.reader)
                .await
                .map_err(query_error)?;
                (total, rows)
            }
        };

        Ok(Page {
            items: rows_to_workflows(&rows)?,
            total: total.max(0) as u64,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn list_all(&self) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = sqlx::query("SELECT id, definition FROM workflows ORDER BY name ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;
        rows_to_workflows(&rows)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }
}
