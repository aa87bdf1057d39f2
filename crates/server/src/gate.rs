//! Request-time cache gate.
//!
//! Every request walks the same path:
//!
//! 1. Exclusion predicates, in order; the first match sends the request
//!    straight to generation without touching the backend
//! 2. Offline backend: generation, no capture
//! 3. Lookup of the meta and data records; both must be present
//! 4. Hit: the stored page is replayed with its headers
//! 5. Miss: the page is generated and handed to [`ResponseCapture`]

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode, header};
use regex::{Regex, RegexBuilder};

use fullpage_core::keys::digest;
use fullpage_core::{Backend, CacheConfig, CacheEntry, KeyBuilder, KeyPair};

use crate::capture::ResponseCapture;
use crate::context::RequestContext;
use crate::error::GateError;
use crate::markup;
use crate::page::PageGenerator;

const ROBOTS_TXT: &str = "/robots.txt";
const LEGACY_FILES_SCRIPT: &str = "/ms-files.php";

/// Why a request bypasses the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    Method(Method),
    Session,
    RobotsTxt,
    /// Multi-tenant uploads served through the legacy file script.
    LegacyFiles,
    DynamicUri,
    UrlPattern,
    Cookie(String),
}

/// Outcome of the lookup phase.
#[derive(Debug)]
pub enum Lookup {
    Excluded(Exclusion),
    Offline,
    Hit(Box<CacheEntry>),
    Miss(KeyPair),
}

/// Serves, or generates and captures, pages for one resolved configuration.
pub struct CacheGate {
    config: Arc<CacheConfig>,
    backend: Arc<Backend>,
    keys: KeyBuilder,
    nocache_url: Option<Regex>,
    capture: ResponseCapture,
}

impl CacheGate {
    pub fn new(config: Arc<CacheConfig>, backend: Arc<Backend>) -> Result<Self, GateError> {
        let pattern = config.nocache_url.trim();
        let nocache_url = if pattern.is_empty() {
            None
        } else {
            let compiled = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| GateError::InvalidPattern { field: "nocache_url", source })?;
            Some(compiled)
        };

        let capture = ResponseCapture::new(config.clone(), backend.clone())?;
        let keys = KeyBuilder::new(&config);
        Ok(Self { config, backend, keys, nocache_url, capture })
    }

    /// Connect the configured engine and build a gate over it.
    pub async fn connect(config: CacheConfig) -> Result<Self, GateError> {
        let backend = Arc::new(Backend::connect(&config).await);
        Self::new(Arc::new(config), backend)
    }

    pub fn config(&self) -> &Arc<CacheConfig> {
        &self.config
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// First exclusion predicate matching `request`, if any.
    pub fn exclusion(&self, request: &RequestContext) -> Option<Exclusion> {
        if request.method != Method::GET {
            return Some(Exclusion::Method(request.method.clone()));
        }
        if request.session_id.as_deref().is_some_and(|id| !id.is_empty()) {
            return Some(Exclusion::Session);
        }
        if request.path().eq_ignore_ascii_case(ROBOTS_TXT) {
            return Some(Exclusion::RobotsTxt);
        }
        if self.config.multisite && request.script_name.to_ascii_lowercase().ends_with(LEGACY_FILES_SCRIPT) {
            return Some(Exclusion::LegacyFiles);
        }
        if self.config.nocache_dyn && request.has_query() {
            return Some(Exclusion::DynamicUri);
        }
        if let Some(pattern) = &self.nocache_url
            && pattern.is_match(&request.request_uri)
        {
            return Some(Exclusion::UrlPattern);
        }

        let prefixes: Vec<&str> = self.config.excluded_cookie_prefixes().collect();
        request
            .cookies
            .keys()
            .find(|name| prefixes.iter().any(|prefix| name.starts_with(*prefix)))
            .map(|name| Exclusion::Cookie(name.clone()))
    }

    pub async fn lookup(&self, request: &RequestContext) -> Lookup {
        if let Some(exclusion) = self.exclusion(request) {
            tracing::debug!(uri = %request.request_uri, ?exclusion, "request excluded from cache");
            return Lookup::Excluded(exclusion);
        }
        if !self.backend.is_alive() {
            return Lookup::Offline;
        }

        let keys = self.keys.pair(&request.key_context());
        let Some(meta) = self.backend.get(&keys.meta).await else {
            tracing::debug!(key = %keys.meta, "meta miss");
            return Lookup::Miss(keys);
        };
        let data = self.backend.get(&keys.data).await;

        match CacheEntry::assemble(Some(meta), data) {
            Some(entry) => Lookup::Hit(Box::new(entry)),
            None => {
                tracing::debug!(key = %keys.data, "data miss");
                Lookup::Miss(keys)
            }
        }
    }

    /// Answer `request` from the cache, or generate and capture it.
    pub async fn handle(&self, request: &RequestContext, generator: &dyn PageGenerator) -> Response<Bytes> {
        let started = Instant::now();
        match self.lookup(request).await {
            Lookup::Hit(entry) => self.serve_hit(request, *entry, started),
            Lookup::Miss(keys) => {
                let page = generator.generate(request).await;
                self.capture.capture(request, &keys, page, started.elapsed()).await
            }
            Lookup::Excluded(_) | Lookup::Offline => generator.generate(request).await.into_response(),
        }
    }

    /// Replay a stored page.
    pub fn serve_hit(&self, request: &RequestContext, entry: CacheEntry, started: Instant) -> Response<Bytes> {
        let CacheEntry { meta, body } = entry;

        if let Some(target) = meta.redirect.as_deref().filter(|t| !t.is_empty()) {
            let mut response = empty(StatusCode::FOUND);
            insert(response.headers_mut(), header::LOCATION, target);
            return response;
        }

        if let Some(since) = request.if_modified_since.as_deref().and_then(markup::parse_http_date)
            && let Some(modified) = meta.lastmodified
            && since >= modified
        {
            return empty(StatusCode::NOT_MODIFIED);
        }

        let mut headers = HeaderMap::new();
        if !meta.mime.is_empty() {
            insert(&mut headers, header::CONTENT_TYPE, &meta.mime);
        }

        match meta.expire {
            Some(expire) => {
                let max_age = self.config.browser_ttl(meta.content_type);
                let cache_control = format!("public,max-age={max_age},s-maxage={max_age},must-revalidate");
                insert(&mut headers, header::CACHE_CONTROL, &cache_control);
                insert(&mut headers, header::EXPIRES, &markup::http_date(expire));
                let etag = format!("\"{}\"", digest(&format!("{}{expire}", request.request_uri)));
                insert(&mut headers, header::ETAG, &etag);
            }
            None => insert(&mut headers, header::EXPIRES, &markup::http_date(Utc::now().timestamp())),
        }

        if let Some(shortlink) = meta.shortlink.as_deref() {
            insert(&mut headers, header::LINK, &format!("<{shortlink}>; rel=shortlink"));
        }
        if let Some(modified) = meta.lastmodified {
            insert(&mut headers, header::LAST_MODIFIED, &markup::http_date(modified));
        }
        if self.config.pingback_header
            && let Some(pingback) = meta.pingback.as_deref()
        {
            insert(&mut headers, HeaderName::from_static("x-pingback"), pingback);
        }
        if self.config.response_header {
            let engine = format!("fullpage with {}", self.backend.kind().as_str());
            insert(&mut headers, HeaderName::from_static("x-cache-engine"), &engine);
        }

        let body = if self.config.generate_time {
            let comment = self.retrieval_comment(request, started);
            markup::insert_before_body_close(&body, &comment).unwrap_or(body)
        } else {
            body
        };

        tracing::debug!(uri = %request.request_uri, content_type = meta.content_type.as_str(), "serving from cache");

        let mut response = Response::new(body);
        *response.status_mut() = if meta.is_not_found() { StatusCode::NOT_FOUND } else { StatusCode::OK };
        *response.headers_mut() = headers;
        response
    }

    fn retrieval_comment(&self, request: &RequestContext, started: Instant) -> String {
        let now = Utc::now();
        format!(
            "\n<!--\n\tfullpage cache retrieval stats\n\tcache engine: {}\n\tcache response: {:.6} seconds\n\tUNIX timestamp: {}\n\tdate: {}\n\tvia web server: {}\n-->\n",
            self.backend.kind().as_str(),
            started.elapsed().as_secs_f64(),
            now.timestamp(),
            now.to_rfc2822(),
            request.server_addr,
        )
    }
}

fn empty(status: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    response
}

/// Insert a header, dropping values that are not valid header text.
fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, "dropping invalid header value"),
    }
}
