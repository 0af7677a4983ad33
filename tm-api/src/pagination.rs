//! Pagination utilities for admin listings

use serde::Serialize;

/// Page size for all paginated listings
pub const PAGE_SIZE: i64 = 50;

/// Pagination metadata calculated from total results
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: i64,
    pub total_pages: i64,
    pub total: i64,
    /// Offset for SQL LIMIT/OFFSET query
    #[serde(skip)]
    pub offset: i64,
}

/// Calculate pagination metadata from total results and requested page
///
/// The page is clamped to `[1, total_pages]`.
///
/// # Examples
/// ```
/// use tm_api::pagination::calculate_pagination;
///
/// // 120 total results = 3 pages (50 + 50 + 20)
/// let p = calculate_pagination(120, 2);
/// assert_eq!(p.page, 2);
/// assert_eq!(p.total_pages, 3);
/// assert_eq!(p.offset, 50);
///
/// // Requesting out-of-bounds page gets clamped
/// let p = calculate_pagination(120, 99);
/// assert_eq!(p.page, 3);
/// assert_eq!(p.offset, 100);
/// ```
pub fn calculate_pagination(total_results: i64, requested_page: i64) -> Pagination {
    let total_pages = (total_results + PAGE_SIZE - 1) / PAGE_SIZE;
    let page = requested_page.max(1).min(total_pages.max(1));
    let offset = (page - 1) * PAGE_SIZE;

    Pagination {
        page,
        total_pages,
        total: total_results,
        offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_matches_stays_on_first_page() {
        for requested in [-3, 0, 1, 7] {
            let p = calculate_pagination(0, requested);
            assert_eq!(p.page, 1, "requested page {}", requested);
            assert_eq!(p.total_pages, 0);
            assert_eq!(p.total, 0);
            assert_eq!(p.offset, 0);
        }
    }

    #[test]
    fn test_single_partial_page() {
        let p = calculate_pagination(3, 2);
        assert_eq!(p.page, 1);
        assert_eq!(p.total_pages, 1);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn test_last_page_of_full_listing() {
        let p = calculate_pagination(PAGE_SIZE * 4, 4);
        assert_eq!(p.total_pages, 4);
        assert_eq!(p.offset, PAGE_SIZE * 3);

        let p = calculate_pagination(PAGE_SIZE * 4 + 1, 9);
        assert_eq!(p.page, 5);
        assert_eq!(p.offset, PAGE_SIZE * 4);
    }

    #[test]
    fn test_total_is_not_serialized_with_offset() {
        let json = serde_json::to_value(calculate_pagination(51, 2)).unwrap();
        assert_eq!(json, serde_json::json!({"page": 2, "total_pages": 2, "total": 51}));
    }
}
