//! Pagination envelope shared by every listing

use serde::Serialize;

use crate::types::{CivicError, Result};

/// Caller-supplied page selection; `None` picks the default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
        }
    }

    /// Resolve to `(page, per_page)`, rejecting zeros and capping the size
    pub fn resolve(&self, default_per_page: u32, max_per_page: u32) -> Result<(u32, u32)> {
        let page = self.page.unwrap_or(1);
        let per_page = self.per_page.unwrap_or(default_per_page);
        if page < 1 {
            return Err(CivicError::Validation("page must be at least 1".to_string()));
        }
        if per_page < 1 {
            return Err(CivicError::Validation(
                "perPage must be at least 1".to_string(),
            ));
        }
        Ok((page, per_page.min(max_per_page)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    #[serde(rename = "perPage")]
    pub per_page: u32,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    pub fn new(page: u32, per_page: u32, total: u64) -> Self {
        Self {
            page,
            per_page,
            total,
            pages: total.div_ceil(u64::from(per_page.max(1))),
        }
    }
}

/// One page of results with its position in the full set
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, per_page: u32, total: u64) -> Self {
        Self {
            items,
            pagination: Pagination::new(page, per_page, total),
        }
    }
}
