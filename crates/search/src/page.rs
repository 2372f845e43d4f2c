use std::ops::Range;

/// Pagination arithmetic for a ranked result list.
///
/// Offsets and page numbers are both zero-based. `window` is the range of
/// page numbers to show links for, centred on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// First result on this page.
    pub start: usize,
    /// One past the last result on this page.
    pub end: usize,
    pub page: usize,
    pub total_pages: usize,
    /// Offset of the previous page, if there is one.
    pub prev: Option<usize>,
    pub next: Option<usize>,
    pub window: Range<usize>,
}

impl Page {
    /// Place `start` within `total` results.
    ///
    /// `start` is clamped to the results, then snapped down to a page
    /// boundary. A `page_size` of zero is treated as one.
    pub fn new(start: i64, total: usize, page_size: usize, window_size: usize) -> Self {
        let page_size = page_size.max(1);
        if total == 0 {
            return Self {
                start: 0,
                end: 0,
                page: 0,
                total_pages: 1,
                prev: None,
                next: None,
                window: 0..1,
            };
        }

        let start = usize::try_from(start).unwrap_or(0).min(total - 1);
        let page = start / page_size;
        let start = page * page_size;
        let end = (start + page_size).min(total);
        let total_pages = (total - 1) / page_size + 1;
        let next = (page + 1) * page_size;

        Self {
            start,
            end,
            page,
            total_pages,
            prev: (page > 0).then(|| (page - 1) * page_size),
            next: (next < total).then_some(next),
            window: page.saturating_sub(window_size)..total_pages.min(page + window_size + 1),
        }
    }
}
