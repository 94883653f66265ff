use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::MessageStatus;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

// -- Pagination --

/// One page of a page-number paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Total rows matching the query across all pages.
    pub count: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_next: bool,
    pub has_previous: bool,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(results: Vec<T>, count: u64, page: u32, page_size: u32) -> Self {
        let seen = u64::from(page) * u64::from(page_size);
        Self {
            count,
            page,
            page_size,
            has_next: seen < count,
            has_previous: page > 1,
            results,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            page: self.page,
            page_size: self.page_size,
            has_next: self.has_next,
            has_previous: self.has_previous,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

// -- Message listing --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageFilter {
    pub status: Option<MessageStatus>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
}

// -- Deletion --

/// Rows removed by a cascading delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeReport {
    pub messages: usize,
    pub notifications: usize,
    pub history: usize,
    pub memberships: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_flags_follow_position() {
        let first: Page<u8> = Page::new(vec![1, 2], 5, 1, 2);
        assert!(first.has_next);
        assert!(!first.has_previous);

        let last: Page<u8> = Page::new(vec![5], 5, 3, 2);
        assert!(!last.has_next);
        assert!(last.has_previous);

        let exact: Page<u8> = Page::new(vec![3, 4], 4, 2, 2);
        assert!(!exact.has_next);
    }

    #[test]
    fn page_map_keeps_metadata() {
        let page = Page::new(vec![1u32, 2], 10, 2, 2).map(|n| n * 10);
        assert_eq!(page.results, vec![10, 20]);
        assert_eq!(page.count, 10);
        assert!(page.has_next && page.has_previous);
    }
}
