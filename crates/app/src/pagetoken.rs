use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

use hrbank_core::pagination::{CursorPage, PageCursor};

pub const DEFAULT_PAGE_SIZE: usize = 30;
pub const MAX_PAGE_SIZE: usize = 100;

/// Resolves the requested page size to the accepted range.
pub fn clamp_page_size(size: Option<usize>) -> usize {
    size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Raised when a caller-supplied cursor token cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed cursor token")]
pub struct PageTokenError;

/// Encodes an ordering key as an opaque token for the wire.
///
/// The token is base64 over `<rfc3339-millis>|<id>`. Callers must treat it as
/// opaque: it is only valid relative to the ordering of the record set it was
/// issued against.
pub fn encode(cursor: PageCursor) -> String {
    let raw = format!(
        "{}|{}",
        cursor.at.to_rfc3339_opts(SecondsFormat::Millis, true),
        cursor.id
    );
    URL_SAFE_NO_PAD.encode(raw)
}

/// Decodes a cursor token back into an ordering key.
pub fn decode(token: &str) -> Result<PageCursor, PageTokenError> {
    let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| PageTokenError)?;
    let raw = String::from_utf8(bytes).map_err(|_| PageTokenError)?;
    let (at_raw, id_raw) = raw.split_once('|').ok_or(PageTokenError)?;
    let at = DateTime::parse_from_rfc3339(at_raw)
        .map_err(|_| PageTokenError)?
        .with_timezone(&Utc);
    let id: i64 = id_raw.parse().map_err(|_| PageTokenError)?;
    Ok(PageCursor::new(at, id))
}

/// Wire shape of a paginated listing response.
#[derive(Debug, Serialize)]
pub struct CursorPageResponse<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_next: bool,
}

impl<T> CursorPageResponse<T> {
    /// Converts a domain page into the wire shape, encoding the next cursor
    /// and mapping each item through `f`.
    pub fn from_page<U, F>(page: CursorPage<U>, f: F) -> Self
    where
        F: FnMut(U) -> T,
    {
        let next_cursor = page.next_cursor.map(encode);
        let mapped = page.map(f);
        Self {
            items: mapped.items,
            next_cursor,
            has_next: mapped.has_next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn page_sizes_are_clamped_to_the_accepted_range() {
        assert_eq!(clamp_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(0)), 1);
        assert_eq!(clamp_page_size(Some(55)), 55);
        assert_eq!(clamp_page_size(Some(5_000)), MAX_PAGE_SIZE);
    }

    #[test]
    fn tokens_round_trip() {
        let cursor = PageCursor::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(), 42);
        let token = encode(cursor);
        assert_eq!(decode(&token), Ok(cursor));
    }

    #[test]
    fn millisecond_precision_survives_the_round_trip() {
        let at = Utc
            .timestamp_millis_opt(1_709_283_000_123)
            .single()
            .expect("valid timestamp");
        let cursor = PageCursor::new(at, 7);
        assert_eq!(decode(&encode(cursor)), Ok(cursor));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert_eq!(decode("not base64!!"), Err(PageTokenError));

        let missing_separator = URL_SAFE_NO_PAD.encode("2024-03-01T09:00:00.000Z");
        assert_eq!(decode(&missing_separator), Err(PageTokenError));

        let bad_timestamp = URL_SAFE_NO_PAD.encode("yesterday|5");
        assert_eq!(decode(&bad_timestamp), Err(PageTokenError));

        let bad_id = URL_SAFE_NO_PAD.encode("2024-03-01T09:00:00.000Z|five");
        assert_eq!(decode(&bad_id), Err(PageTokenError));
    }
}
