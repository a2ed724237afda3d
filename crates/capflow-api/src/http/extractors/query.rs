//! Query parameter extractors for list endpoints.

use capflow_core::repository::PageRequest;
use capflow_core::repository::execution::ExecutionFilter;
use capflow_types::capsule::CapsuleCategory;
use capflow_types::execution::ExecutionStatus;
use serde::Deserialize;
use uuid::Uuid;

use crate::http::error::AppError;

#[derive(Debug, Deserialize, Default)]
pub struct WorkflowListQuery {
    pub tag: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl WorkflowListQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ExecutionListQuery {
    pub workflow_id: Option<Uuid>,
    /// `queued`, `running`, `completed`, `failed` or `cancelled`.
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ExecutionListQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }

    pub fn filter(&self) -> Result<ExecutionFilter, AppError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<ExecutionStatus>)
            .transpose()
            .map_err(AppError::BadRequest)?;
        Ok(ExecutionFilter {
            workflow_id: self.workflow_id,
            status,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct EventsQuery {
    /// Last sequence number the client has seen; 0 replays everything.
    #[serde(default)]
    pub after_seq: u64,
}

#[derive(Debug, Deserialize, Default)]
pub struct CapsuleListQuery {
    pub category: Option<String>,
}

impl CapsuleListQuery {
    pub fn category(&self) -> Result<Option<CapsuleCategory>, AppError> {
        self.category
            .as_deref()
            .map(str::parse::<CapsuleCategory>)
            .transpose()
            .map_err(AppError::BadRequest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_filter_parses_status() {
        let query = ExecutionListQuery {
            status: Some("failed".to_string()),
            ..Default::default()
        };
        assert_eq!(query.filter().unwrap().status, Some(ExecutionStatus::Failed));

        let bad = ExecutionListQuery {
            status: Some("sleeping".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad.filter(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn page_query_is_clamped() {
        let query = WorkflowListQuery {
            page: Some(0),
            page_size: Some(10_000),
            ..Default::default()
        };
        let page = query.page_request();
        assert_eq!(page.page, 1);
        assert!(page.page_size <= capflow_core::repository::MAX_PAGE_SIZE);
    }

    #[test]
    fn capsule_category_filter() {
        let query = CapsuleListQuery {
            category: Some("output".to_string()),
        };
        assert_eq!(query.category().unwrap(), Some(CapsuleCategory::Output));
        assert!(CapsuleListQuery::default().category().unwrap().is_none());
    }
}
