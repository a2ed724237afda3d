//! Envelope response format for all API responses.
//!
//! ```json
//! {
//!   "data": { ... },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 },
//!   "errors": [],
//!   "_links": { "self": "..." }
//! }
//! ```
//!
//! List endpoints add `meta.pagination`.

use std::collections::BTreeMap;
use std::time::Instant;

use capflow_core::repository::Page;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    pub meta: ApiMeta,

    /// Empty on success.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiErrorDetail>,

    #[serde(rename = "_links", skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub request_id: String,
    /// RFC 3339.
    pub timestamp: String,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable code such as `WORKFLOW_NOT_FOUND`.
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Per-request timing and ID, started at the top of each handler.
#[derive(Debug, Clone)]
pub struct RequestClock {
    started: Instant,
    request_id: String,
}

impl RequestClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            request_id: Uuid::now_v7().to_string(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl ApiMeta {
    pub fn new(request_id: String, response_time_ms: u64) -> Self {
        Self {
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            response_time_ms,
            pagination: None,
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, clock: &RequestClock) -> Self {
        Self {
            data: Some(data),
            meta: ApiMeta::new(clock.request_id().to_string(), clock.elapsed_ms()),
            errors: Vec::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn with_link(mut self, rel: &str, href: &str) -> Self {
        self.links.insert(rel.to_string(), href.to_string());
        self
    }
}

impl<T: Serialize> ApiResponse<Vec<T>> {
    /// Success response for one page of a list query.
    pub fn page(page: Page<T>, clock: &RequestClock) -> Self {
        let pagination = Pagination {
            page: page.page,
            page_size: page.page_size,
            total: page.total,
        };
        let mut response = Self::success(page.items, clock);
        response.meta.pagination = Some(pagination);
        response
    }
}

impl ApiResponse<()> {
    /// Error envelope with no data.
    pub fn error(code: &str, message: String, details: Option<serde_json::Value>) -> Self {
        Self {
            data: None,
            meta: ApiMeta::new(String::new(), 0),
            errors: vec![ApiErrorDetail {
                code: code.to_string(),
                message,
                details,
            }],
            links: BTreeMap::new(),
        }
    }
}
