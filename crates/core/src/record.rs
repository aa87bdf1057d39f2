//! Cached page records.
//!
//! A cached page is two independently stored records: the metadata record and
//! the raw body. A page only counts as cached when both are present and
//! non-empty.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Classification of a generated page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Home,
    Feed,
    Archive,
    Single,
    Page,
    Unknown,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Home => "home",
            ContentType::Feed => "feed",
            ContentType::Archive => "archive",
            ContentType::Single => "single",
            ContentType::Page => "page",
            ContentType::Unknown => "unknown",
        }
    }
}

/// Metadata stored next to a cached body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    /// Server-side TTL the entry was written with.
    #[serde(default)]
    pub ttl: u64,
    /// Absolute browser-cache expiry (unix seconds); `None` when browser caching is off.
    #[serde(default)]
    pub expire: Option<i64>,
    /// Last modification of the underlying content (unix seconds).
    #[serde(default)]
    pub lastmodified: Option<i64>,
    #[serde(default)]
    pub shortlink: Option<String>,
    #[serde(default)]
    pub pingback: Option<String>,
    /// Stored HTTP status; only 404 is ever recorded.
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub redirect: Option<String>,
    pub mime: String,
}

impl MetaRecord {
    pub fn new(content_type: ContentType, mime: impl Into<String>) -> Self {
        Self {
            content_type,
            ttl: 0,
            expire: None,
            lastmodified: None,
            shortlink: None,
            pingback: None,
            status: None,
            redirect: None,
            mime: mime.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    pub fn encode(&self) -> Result<Bytes, Error> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// A complete cache hit: both records present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub meta: MetaRecord,
    pub body: Bytes,
}

impl CacheEntry {
    /// Combine the two raw records fetched from storage.
    ///
    /// Either record missing, empty, or the meta record undecodable yields
    /// `None`, which callers treat as a full miss.
    pub fn assemble(meta: Option<Bytes>, body: Option<Bytes>) -> Option<Self> {
        let meta = meta.filter(|m| !m.is_empty())?;
        let body = body.filter(|b| !b.is_empty())?;

        match MetaRecord::decode(&meta) {
            Ok(meta) => Some(Self { meta, body }),
            Err(e) => {
                tracing::debug!(error = %e, "discarding undecodable meta record");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> MetaRecord {
        MetaRecord {
            lastmodified: Some(1_700_000_000),
            shortlink: Some("https://example.com/?p=42".into()),
            ..MetaRecord::new(ContentType::Single, "text/html;charset=utf-8")
        }
    }

    #[test]
    fn test_meta_roundtrip() {
        let meta = sample_meta();
        let decoded = MetaRecord::decode(&meta.encode().unwrap()).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_meta_type_field_name() {
        let json = String::from_utf8(sample_meta().encode().unwrap().to_vec()).unwrap();
        assert!(json.contains(r#""type":"single""#));
    }

    #[test]
    fn test_assemble_requires_both() {
        let meta = sample_meta().encode().unwrap();
        let body = Bytes::from_static(b"<html></html>");

        assert!(CacheEntry::assemble(Some(meta.clone()), Some(body.clone())).is_some());
        assert!(CacheEntry::assemble(Some(meta.clone()), None).is_none());
        assert!(CacheEntry::assemble(None, Some(body.clone())).is_none());
        assert!(CacheEntry::assemble(Some(meta), Some(Bytes::new())).is_none());
        assert!(CacheEntry::assemble(Some(Bytes::new()), Some(body)).is_none());
    }

    #[test]
    fn test_assemble_rejects_garbage_meta() {
        let entry = CacheEntry::assemble(Some(Bytes::from_static(b"not json")), Some(Bytes::from_static(b"body")));
        assert!(entry.is_none());
    }

    #[test]
    fn test_not_found_flag() {
        let meta = MetaRecord { status: Some(404), ..sample_meta() };
        assert!(meta.is_not_found());
        assert!(!sample_meta().is_not_found());
    }
}
