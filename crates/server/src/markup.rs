//! Byte-level helpers over generated markup, and HTTP date formatting.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

const BODY_CLOSE: &[u8] = b"</body>";

/// Position of `needle` in `haystack`, ignoring ASCII case.
pub fn find_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window.eq_ignore_ascii_case(needle))
}

pub fn contains_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    find_ignore_ascii_case(haystack, needle).is_some()
}

/// Whether the body carries a closing HTML or RSS root element.
pub fn is_complete_document(body: &[u8]) -> bool {
    contains_ignore_ascii_case(body, b"</html>") || contains_ignore_ascii_case(body, b"</rss>")
}

/// `body` without leading and trailing ASCII whitespace, sharing the buffer.
pub fn trim(body: &Bytes) -> Bytes {
    let start = body.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(body.len());
    let end = body.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    body.slice(start..end)
}

/// Insert `comment` right before the first `</body>`; `None` when there is none.
pub fn insert_before_body_close(body: &[u8], comment: &str) -> Option<Bytes> {
    let at = find_ignore_ascii_case(body, BODY_CLOSE)?;
    let mut out = BytesMut::with_capacity(body.len() + comment.len());
    out.extend_from_slice(&body[..at]);
    out.extend_from_slice(comment.as_bytes());
    out.extend_from_slice(&body[at..]);
    Some(out.freeze())
}

/// IMF-fixdate, e.g. `Tue, 14 Nov 2023 22:13:20 GMT`.
pub fn http_date(unix: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix, 0).unwrap_or_default().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an `If-Modified-Since` value, ignoring anything after a `;`.
pub fn parse_http_date(raw: &str) -> Option<i64> {
    let value = raw.split(';').next().unwrap_or_default().trim();
    DateTime::parse_from_rfc2822(value).ok().map(|d| d.timestamp())
}
