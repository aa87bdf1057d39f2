//! Post-generation capture of a missed page.
//!
//! Runs once per miss with the generated page in hand: decides whether the
//! page may be stored, classifies it, writes the meta and data records, and
//! hands the body back to the caller. Storage problems are logged and never
//! change what the visitor receives.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use http::{Response, StatusCode};
use regex::bytes::Regex;

use fullpage_core::{Backend, CacheConfig, ContentType, KeyPair, MetaRecord};

use crate::context::RequestContext;
use crate::error::GateError;
use crate::markup;
use crate::page::{GeneratedPage, PageContext};

/// Why a generated page was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DoNotCache,
    MarkersUnavailable,
    /// No closing `</html>` or `</rss>`.
    Incomplete,
    Empty,
    CommentPattern,
    TypeExcluded(ContentType),
}

/// Stores generated pages under a request's key pair.
pub struct ResponseCapture {
    config: Arc<CacheConfig>,
    backend: Arc<Backend>,
    nocache_comment: Option<Regex>,
}

impl ResponseCapture {
    pub fn new(config: Arc<CacheConfig>, backend: Arc<Backend>) -> Result<Self, GateError> {
        let pattern = config.nocache_comment.trim();
        let nocache_comment = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern).map_err(|source| GateError::InvalidPattern { field: "nocache_comment", source })?)
        };
        Ok(Self { config, backend, nocache_comment })
    }

    /// Store `page` if eligible and return the response for the caller.
    ///
    /// `generation` is how long the request took so far, reported in the
    /// stored diagnostics comment.
    pub async fn capture(
        &self, request: &RequestContext, keys: &KeyPair, page: GeneratedPage, generation: Duration,
    ) -> Response<Bytes> {
        let status = page.status;

        if page.context.do_not_cache {
            return self.skip(request, SkipReason::DoNotCache, page);
        }
        if !page.context.markers_available {
            return self.skip(request, SkipReason::MarkersUnavailable, page);
        }
        if !markup::is_complete_document(&page.body) {
            return self.skip(request, SkipReason::Incomplete, page);
        }

        let body = markup::trim(&page.body);
        if body.is_empty() {
            tracing::debug!(uri = %request.request_uri, reason = ?SkipReason::Empty, "not caching");
            return page.respond_with(status, Some(body));
        }
        if let Some(pattern) = &self.nocache_comment
            && pattern.is_match(&body)
        {
            tracing::debug!(uri = %request.request_uri, reason = ?SkipReason::CommentPattern, "not caching");
            return page.respond_with(status, Some(body));
        }

        let content_type = page.context.content_type();
        if self.config.excludes(content_type) {
            tracing::debug!(uri = %request.request_uri, reason = ?SkipReason::TypeExcluded(content_type), "not caching");
            return page.respond_with(status, Some(body));
        }

        let meta = self.meta_for(&page.context, content_type, Utc::now().timestamp());
        let stored = if self.config.generate_time {
            let comment = self.generation_comment(request, generation);
            markup::insert_before_body_close(&body, &comment).unwrap_or_else(|| body.clone())
        } else {
            body.clone()
        };
        self.store(keys, &meta, stored).await;

        let status = if meta.is_not_found() {
            StatusCode::NOT_FOUND
        } else if status.is_redirection() {
            status
        } else {
            StatusCode::OK
        };
        page.respond_with(status, Some(body))
    }

    /// Metadata for a page of `content_type` captured at `now`.
    pub fn meta_for(&self, context: &PageContext, content_type: ContentType, now: i64) -> MetaRecord {
        let mime = match content_type {
            ContentType::Feed => format!("text/xml;charset={}", self.config.charset),
            _ => format!("text/html;charset={}", self.config.charset),
        };

        let browser_ttl = self.config.browser_ttl(content_type);
        let non_empty = |value: &Option<String>| value.as_ref().filter(|v| !v.is_empty()).cloned();

        MetaRecord {
            ttl: self.config.server_ttl(content_type),
            expire: (browser_ttl > 0).then(|| now.saturating_add(i64::try_from(browser_ttl).unwrap_or(i64::MAX))),
            lastmodified: context.last_modified,
            shortlink: non_empty(&context.shortlink),
            pingback: non_empty(&context.pingback),
            status: context.is_not_found.then_some(404),
            redirect: non_empty(&context.redirect),
            ..MetaRecord::new(content_type, mime)
        }
    }

    fn skip(&self, request: &RequestContext, reason: SkipReason, page: GeneratedPage) -> Response<Bytes> {
        tracing::debug!(uri = %request.request_uri, ?reason, "not caching");
        page.into_response()
    }

    async fn store(&self, keys: &KeyPair, meta: &MetaRecord, body: Bytes) {
        let encoded = match meta.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(key = %keys.meta, error = %e, "failed to encode meta record");
                return;
            }
        };

        let data_stored = self.backend.set(&keys.data, body, meta.ttl).await;
        let meta_stored = self.backend.set(&keys.meta, encoded, meta.ttl).await;
        if data_stored && meta_stored {
            tracing::debug!(key = %keys.data, content_type = meta.content_type.as_str(), ttl = meta.ttl, "page stored");
        }
    }

    fn generation_comment(&self, request: &RequestContext, generation: Duration) -> String {
        let now = Utc::now();
        format!(
            "\n<!--\n\tfullpage cache generation stats\n\tgeneration time: {:.3} seconds\n\tgenerated at: {}\n\tUNIX timestamp: {}\n\tcache engine: {}\n\tvia web server: {}\n-->\n",
            generation.as_secs_f64(),
            now.to_rfc2822(),
            now.timestamp(),
            self.backend.kind().as_str(),
            request.server_addr,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{local_backend, page_context};

    fn capture(config: CacheConfig, backend: &Arc<Backend>) -> ResponseCapture {
        ResponseCapture::new(Arc::new(config), backend.clone()).unwrap()
    }

    fn keys() -> KeyPair {
        KeyPair { meta: "meta-http://example.com/a/".into(), data: "data-http://example.com/a/".into() }
    }

    fn request() -> RequestContext {
        RequestContext::get("http", "example.com", "/a/")
    }

    #[tokio::test]
    async fn test_stores_trimmed_body_and_meta() {
        let (backend, store) = local_backend().await;
        let capture = capture(CacheConfig { expire: 120, browsercache: 60, ..Default::default() }, &backend);
        let mut context = page_context();
        context.is_single = true;
        context.last_modified = Some(1_700_000_000);
        context.shortlink = Some("http://example.com/?p=1".into());

        let page = GeneratedPage::ok("\n <html><body>a</body></html>\n", context);
        let response = capture.capture(&request(), &keys(), page, Duration::ZERO).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"<html><body>a</body></html>");
        assert_eq!(store.len(), 2);

        let body = backend.get(&keys().data).await.unwrap();
        assert_eq!(body.as_ref(), b"<html><body>a</body></html>");
        let meta = MetaRecord::decode(&backend.get(&keys().meta).await.unwrap()).unwrap();
        assert_eq!(meta.content_type, ContentType::Single);
        assert_eq!(meta.ttl, 120);
        assert!(meta.expire.is_some());
        assert_eq!(meta.lastmodified, Some(1_700_000_000));
        assert_eq!(meta.mime, "text/html;charset=utf-8");
        assert_eq!(meta.shortlink.as_deref(), Some("http://example.com/?p=1"));
    }

    #[tokio::test]
    async fn test_skip_predicates_store_nothing() {
        let (backend, store) = local_backend().await;
        let capture = capture(CacheConfig { nocache_comment: "<!-- private -->".into(), ..Default::default() }, &backend);

        let mut flagged = page_context();
        flagged.do_not_cache = true;
        let pages = [
            GeneratedPage::ok("<html></html>", flagged),
            GeneratedPage::ok("<html></html>", PageContext::default()),
            GeneratedPage::ok("<html><body>partial", page_context()),
            GeneratedPage::ok("<html><!-- private --></html>", page_context()),
        ];

        for page in pages {
            let expected = page.body.clone();
            let response = capture.capture(&request(), &keys(), page, Duration::ZERO).await;
            assert_eq!(response.body(), &expected);
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_excluded_type_returns_body_unstored() {
        let (backend, store) = local_backend().await;
        let capture = capture(CacheConfig { nocache_feed: true, ..Default::default() }, &backend);
        let mut context = page_context();
        context.is_feed = true;

        let response = capture.capture(&request(), &keys(), GeneratedPage::ok("<rss></rss>", context), Duration::ZERO).await;
        assert_eq!(response.body().as_ref(), b"<rss></rss>");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_feed_mime_and_home_ttl() {
        let (backend, _store) = local_backend().await;
        let config = CacheConfig { expire_home: Some(30), charset: "iso-8859-1".into(), ..Default::default() };
        let capture = capture(config, &backend);
        let mut context = page_context();
        context.is_feed = true;

        let meta = capture.meta_for(&context, context.content_type(), 1_000);
        assert_eq!(meta.mime, "text/xml;charset=iso-8859-1");
        assert_eq!(meta.ttl, 30);
        assert_eq!(meta.expire, None);
    }

    #[tokio::test]
    async fn test_not_found_is_stored_with_status() {
        let (backend, _store) = local_backend().await;
        let capture = capture(CacheConfig::default(), &backend);
        let mut context = page_context();
        context.is_not_found = true;
        let mut page = GeneratedPage::ok("<html>gone</html>", context);
        page.status = StatusCode::NOT_FOUND;

        let response = capture.capture(&request(), &keys(), page, Duration::ZERO).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let meta = MetaRecord::decode(&backend.get(&keys().meta).await.unwrap()).unwrap();
        assert!(meta.is_not_found());
    }

    #[tokio::test]
    async fn test_generation_comment_only_in_stored_copy() {
        let (backend, _store) = local_backend().await;
        let capture = capture(CacheConfig { generate_time: true, ..Default::default() }, &backend);
        let page = GeneratedPage::ok("<html><body>a</body></html>", page_context());

        let response = capture.capture(&request(), &keys(), page, Duration::from_millis(12)).await;
        assert_eq!(response.body().as_ref(), b"<html><body>a</body></html>");

        let stored = backend.get(&keys().data).await.unwrap();
        let stored = String::from_utf8(stored.to_vec()).unwrap();
        assert!(stored.contains("generation stats"));
        assert!(stored.ends_with("</body></html>"));
    }

    #[tokio::test]
    async fn test_invalid_comment_pattern() {
        let (backend, _store) = local_backend().await;
        let config = Arc::new(CacheConfig { nocache_comment: "(".into(), ..Default::default() });
        assert!(matches!(
            ResponseCapture::new(config, backend),
            Err(GateError::InvalidPattern { field: "nocache_comment", .. })
        ));
    }
}
