use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composite ordering key marking the last-seen record of a paginated scan.
///
/// The tuple order (timestamp first, id as tie-break) gives every record a
/// distinct position even when timestamps collide, so a scan resumed from a
/// cursor never skips or repeats a row at a page boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageCursor {
    pub at: DateTime<Utc>,
    pub id: i64,
}

impl PageCursor {
    pub fn new(at: DateTime<Utc>, id: i64) -> Self {
        Self { at, id }
    }
}

/// One page of records plus the information needed to request the next one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<PageCursor>,
    pub has_next: bool,
}

impl<T> CursorPage<T> {
    /// Builds a page from rows fetched with a `page_size + 1` limit.
    ///
    /// The extra row, when present, only proves that more records exist; it
    /// is discarded before the page is returned. On the terminal page
    /// `next_cursor` is `None`. Row order is preserved exactly as fetched.
    pub fn from_rows<K>(mut rows: Vec<T>, page_size: usize, key: K) -> Self
    where
        K: Fn(&T) -> PageCursor,
    {
        let has_next = rows.len() > page_size;
        if has_next {
            rows.truncate(page_size);
        }
        let next_cursor = if has_next { rows.last().map(key) } else { None };
        Self {
            items: rows,
            next_cursor,
            has_next,
        }
    }

    /// Maps the page items while keeping the pagination envelope intact.
    pub fn map<U, F>(self, f: F) -> CursorPage<U>
    where
        F: FnMut(T) -> U,
    {
        CursorPage {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
            has_next: self.has_next,
        }
    }
}

/// Runs one step of a cursor-paginated scan.
///
/// `fetch` receives the cursor and a limit of `page_size + 1` and must return
/// rows strictly beyond the cursor in the scan order it maintains. The engine
/// itself is filter- and direction-agnostic: the departments listing scans
/// ascending strictly-after while the employee-log listing scans descending
/// strictly-before, and both use this same function. `key` extracts the
/// ordering key used for the next cursor.
pub async fn paginate<T, E, K, F, Fut>(
    cursor: Option<PageCursor>,
    page_size: usize,
    key: K,
    fetch: F,
) -> Result<CursorPage<T>, E>
where
    K: Fn(&T) -> PageCursor,
    F: FnOnce(Option<PageCursor>, usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
{
    debug_assert!(page_size >= 1, "page size must be at least 1");
    let rows = fetch(cursor, page_size + 1).await?;
    Ok(CursorPage::from_rows(rows, page_size, key))
}
