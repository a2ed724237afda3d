//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (capflow-infra) implements. The core crate never depends on any specific
//! storage technology; `memory` provides in-process implementations used by
//! tests and the single-process engine.

pub mod execution;
pub mod memory;
pub mod share;
pub mod workflow;

use serde::Serialize;

/// Default page size for list queries.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Upper bound on a requested page size.
pub const MAX_PAGE_SIZE: u32 = 200;

/// One page of a list query (pages are 1-based).
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Page coordinates, clamped to sane bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    /// Slice an already-filtered, already-sorted list into this page.
    pub fn apply<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len() as u64;
        let items = items
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.page_size as usize)
            .collect();
        Page {
            items,
            total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}
