//! The page generation capability the cache wraps.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};

use fullpage_core::ContentType;

use crate::context::RequestContext;

/// What the generator knew about the page it rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContext {
    /// Whether the classification markers below were computed at all.
    pub markers_available: bool,
    pub is_home: bool,
    pub is_feed: bool,
    pub is_archive: bool,
    pub is_single: bool,
    pub is_page: bool,
    pub is_not_found: bool,
    /// Raised during generation to keep this response out of the cache.
    pub do_not_cache: bool,
    pub redirect: Option<String>,
    /// Modification time of the underlying content (unix seconds).
    pub last_modified: Option<i64>,
    pub shortlink: Option<String>,
    pub pingback: Option<String>,
}

impl PageContext {
    /// First matching marker wins: home, feed, archive, single, page.
    pub fn content_type(&self) -> ContentType {
        if self.is_home {
            ContentType::Home
        } else if self.is_feed {
            ContentType::Feed
        } else if self.is_archive {
            ContentType::Archive
        } else if self.is_single {
            ContentType::Single
        } else if self.is_page {
            ContentType::Page
        } else {
            ContentType::Unknown
        }
    }
}

/// A rendered response plus its generation context.
#[derive(Debug, Clone)]
pub struct GeneratedPage {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub context: PageContext,
}

impl GeneratedPage {
    /// A 200 response with the given body.
    pub fn ok(body: impl Into<Bytes>, context: PageContext) -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body: body.into(), context }
    }

    pub fn into_response(self) -> Response<Bytes> {
        let status = self.status;
        self.respond_with(status, None)
    }

    /// This page's headers with a different status, and optionally a different body.
    pub fn respond_with(self, status: StatusCode, body: Option<Bytes>) -> Response<Bytes> {
        let mut response = Response::new(body.unwrap_or(self.body));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Renders pages for requests the cache cannot answer.
#[async_trait]
pub trait PageGenerator: Send + Sync {
    async fn generate(&self, request: &RequestContext) -> GeneratedPage;
}
