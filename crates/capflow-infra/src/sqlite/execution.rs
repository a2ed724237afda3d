//! SQLite execution repository implementation.
//!
//! The execution record (snapshot, node records, artifacts) is one JSON
//! document; status, workflow and timestamps are mirrored into columns for
//! filtering. Events go to `execution_events`, keyed by `(execution_id, seq)`.

use capflow_core::repository::execution::{ExecutionFilter, ExecutionRepository};
use capflow_core::repository::{Page, PageRequest};
use capflow_types::error::RepositoryError;
use capflow_types::event::ExecutionEvent;
use capflow_types::execution::WorkflowExecution;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, from_json, is_unique_violation, query_error, to_json};

/// SQLite-backed execution and event log storage.
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution, RepositoryError> {
    let record: String = row.try_get("record").map_err(query_error)?;
    from_json(&record, "execution record")
}

fn event_from_row(row: &SqliteRow) -> Result<ExecutionEvent, RepositoryError> {
    let payload: String = row.try_get("payload").map_err(query_error)?;
    from_json(&payload, "execution event")
}

/// WHERE clause plus its bind values, built from the optional filters.
fn filter_clause(filter: &ExecutionFilter) -> (String, Vec<String>) {
    let mut conditions = Vec::new();
    let mut binds = Vec::new();
    if let Some(workflow_id) = filter.workflow_id {
        conditions.push("workflow_id = ?");
        binds.push(workflow_id.to_string());
    }
    if let Some(status) = filter.status {
        conditions.push("status = ?");
        binds.push(status.as_str().to_string());
    }
    if conditions.is_empty() {
        (String::new(), binds)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), binds)
    }
}

impl ExecutionRepository for SqliteExecutionRepository {
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let record = to_json(execution, "execution record")?;

        sqlx::query(
            r#"INSERT INTO executions
               (id, workflow_id, status, trigger_type, last_seq, record, created_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 last_seq = excluded.last_seq,
                 record = excluded.record,
                 completed_at = excluded.completed_at"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.status.as_str())
        .bind(execution.trigger_type.as_str())
        .bind(execution.last_seq as i64)
        .bind(&record)
        .bind(format_datetime(&execution.created_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT record FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn list(
        &self,
        filter: &ExecutionFilter,
        page: PageRequest,
    ) -> Result<Page<WorkflowExecution>, RepositoryError> {
        let (clause, binds) = filter_clause(filter);

        let count_sql = format!("SELECT COUNT(*) FROM executions {clause}");
        let mut count = sqlx::query_scalar::<_, i64>(&count_sql);
        for value in &binds {
            count = count.bind(value);
        }
        let total = count.fetch_one(&self.pool.reader).await.map_err(query_error)?;

        // UUIDv7 ids sort by creation time.
        let list_sql = format!("SELECT record FROM executions {clause} ORDER BY id DESC LIMIT ? OFFSET ?");
        let mut query = sqlx::query(&list_sql);
        for value in &binds {
            query = query.bind(value);
        }
        let rows = query
            .bind(i64::from(page.page_size))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        Ok(Page {
            items: rows.iter().map(execution_from_row).collect::<Result<_, _>>()?,
            total: total.max(0) as u64,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn list_unfinished(&self) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT record FROM executions WHERE status IN ('queued', 'running') ORDER BY id ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn append_share_link(&self, execution_id: &Uuid, share_link_id: &Uuid) -> Result<(), RepositoryError> {
        // Read-modify-write inside one transaction on the single writer
        // connection, so concurrent appends cannot lose each other.
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let row = sqlx::query("SELECT record FROM executions WHERE id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?
            .ok_or(RepositoryError::NotFound)?;
        let mut execution = execution_from_row(&row)?;
        if !execution.share_link_ids.contains(share_link_id) {
            execution.share_link_ids.push(*share_link_id);
        }

        sqlx::query("UPDATE executions SET record = ? WHERE id = ?")
            .bind(to_json(&execution, "execution record")?)
            .bind(execution_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn append_event(&self, event: &ExecutionEvent) -> Result<(), RepositoryError> {
        let payload = to_json(event, "execution event")?;

        sqlx::query("INSERT INTO execution_events (execution_id, seq, at, payload) VALUES (?, ?, ?, ?)")
            .bind(event.execution_id.to_string())
            .bind(event.seq as i64)
            .bind(format_datetime(&event.at))
            .bind(&payload)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RepositoryError::Conflict(format!(
                        "event seq {} already recorded for execution {}",
                        event.seq, event.execution_id
                    ))
                } else {
                    query_error(e)
                }
            })?;

        Ok(())
    }

    async fn list_events_since(
        &self,
        execution_id: &Uuid,
        after_seq: u64,
    ) -> Result<Vec<ExecutionEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT payload FROM execution_events WHERE execution_id = ? AND seq > ? ORDER BY seq ASC",
        )
        .bind(execution_id.to_string())
        .bind(after_seq as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter().map(event_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_pool;
    use capflow_types::event::ExecutionEventKind;
    use capflow_types::execution::{ExecutionStatus, NodeExecution, NodeStatus};
    use capflow_types::workflow::{TriggerType, Workflow};
    use chrono::Utc;
    use serde_json::json;

    fn workflow() -> Workflow {
        serde_json::from_value(json!({
            "name": "digest",
            "nodes": [
                {"node_id": "start", "name": "Start", "type": "manual-trigger"},
                {"node_id": "render", "name": "Render", "type": "report-renderer",
                 "config": {"title": "Digest"}}
            ]
        }))
        .unwrap()
    }

    fn execution(wf: &Workflow, status: ExecutionStatus) -> WorkflowExecution {
        WorkflowExecution {
            id: Uuid::now_v7(),
            workflow_id: wf.id,
            workflow_name: wf.name.clone(),
            workflow_version: wf.version,
            snapshot: wf.snapshot(),
            trigger_type: TriggerType::Manual,
            triggered_by: Some("tester".to_string()),
            status,
            variables: serde_json::Map::new(),
            node_executions: wf.nodes.iter().map(NodeExecution::pending).collect(),
            final_artifacts: Vec::new(),
            share_link_ids: Vec::new(),
            last_seq: 0,
            error_message: None,
            resumed_from: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn event(execution_id: Uuid, seq: u64) -> ExecutionEvent {
        ExecutionEvent {
            execution_id,
            seq,
            at: Utc::now(),
            kind: ExecutionEventKind::NodeStarted {
                node_id: "start".to_string(),
                attempt: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_save_get_and_update() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteExecutionRepository::new(pool);
        let wf = workflow();
        let mut exec = execution(&wf, ExecutionStatus::Queued);
        repo.save(&exec).await.unwrap();

        exec.status = ExecutionStatus::Completed;
        exec.last_seq = 7;
        exec.completed_at = Some(Utc::now());
        exec.node_executions[0].status = NodeStatus::Completed;
        repo.save(&exec).await.unwrap();

        let loaded = repo.get(&exec.id).await.unwrap().unwrap();
        assert_eq!(loaded, exec);
        assert!(repo.get(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_newest_first() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteExecutionRepository::new(pool);
        let wf = workflow();
        let other = workflow();

        let first = execution(&wf, ExecutionStatus::Completed);
        let second = execution(&wf, ExecutionStatus::Failed);
        let third = execution(&other, ExecutionStatus::Completed);
        for e in [&first, &second, &third] {
            repo.save(e).await.unwrap();
        }

        let all = repo.list(&ExecutionFilter::default(), PageRequest::default()).await.unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.items[0].id, third.id);

        let filter = ExecutionFilter {
            workflow_id: Some(wf.id),
            status: Some(ExecutionStatus::Completed),
        };
        let page = repo.list(&filter, PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, first.id);

        let by_workflow = ExecutionFilter {
            workflow_id: Some(wf.id),
            status: None,
        };
        let paged = repo.list(&by_workflow, PageRequest::new(Some(1), Some(1))).await.unwrap();
        assert_eq!(paged.total, 2);
        assert_eq!(paged.items.len(), 1);
        assert_eq!(paged.items[0].id, second.id);
    }

    #[tokio::test]
    async fn test_list_unfinished() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteExecutionRepository::new(pool);
        let wf = workflow();
        let queued = execution(&wf, ExecutionStatus::Queued);
        let running = execution(&wf, ExecutionStatus::Running);
        let done = execution(&wf, ExecutionStatus::Cancelled);
        for e in [&queued, &running, &done] {
            repo.save(e).await.unwrap();
        }

        let ids: Vec<Uuid> = repo.list_unfinished().await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![queued.id, running.id]);
    }

    #[tokio::test]
    async fn test_append_share_link() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteExecutionRepository::new(pool);
        let exec = execution(&workflow(), ExecutionStatus::Completed);
        repo.save(&exec).await.unwrap();

        let link_a = Uuid::now_v7();
        let link_b = Uuid::now_v7();
        repo.append_share_link(&exec.id, &link_a).await.unwrap();
        repo.append_share_link(&exec.id, &link_b).await.unwrap();

        let loaded = repo.get(&exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.share_link_ids, vec![link_a, link_b]);

        let missing = repo.append_share_link(&Uuid::now_v7(), &link_a).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_events_since_and_duplicate_seq() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteExecutionRepository::new(pool);
        let id = Uuid::now_v7();
        for seq in [1, 2, 3, 4] {
            repo.append_event(&event(id, seq)).await.unwrap();
        }
        repo.append_event(&event(Uuid::now_v7(), 9)).await.unwrap();

        let events = repo.list_events_since(&id, 2).await.unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert_eq!(events[0].kind.node_id(), Some("start"));

        let dup = repo.append_event(&event(id, 3)).await;
        assert!(matches!(dup, Err(RepositoryError::Conflict(_))));
    }
}
