//! HTTP client that warms the page cache.
//!
//! A warm request is an ordinary GET: the cache gate in front of the site
//! stores the page on a miss. Only the body size is kept; bytes are streamed
//! and discarded, and the transfer is abandoned past `max_bytes`.

pub mod url;

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode, Url, header, redirect};

pub use self::url::{TargetError, absolutize, parse_target};

use fullpage_core::{Error, PrecacheConfig};

/// Diagnostic header the gate adds to cache hits when enabled.
const CACHE_ENGINE_HEADER: &str = "x-cache-engine";

/// Settings for the warming client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    /// Largest body worth warming (default: 10MB)
    pub max_bytes: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "fullpage-precache/0.1".to_string(),
            timeout: Duration::from_secs(20),
            max_bytes: 10 * 1024 * 1024,
            max_redirects: 5,
        }
    }
}

impl From<&PrecacheConfig> for FetchConfig {
    fn from(config: &PrecacheConfig) -> Self {
        Self { user_agent: config.user_agent.clone(), timeout: config.timeout(), ..Self::default() }
    }
}

/// Outcome of one warm request.
#[derive(Debug, Clone)]
pub struct WarmResponse {
    pub url: Url,
    pub status: StatusCode,
    /// Body length in bytes.
    pub size: usize,
    pub elapsed: Duration,
    /// The response carried the gate's diagnostic header.
    pub served_from_cache: bool,
}

pub struct FetchClient {
    http: Client,
    max_bytes: usize,
}

impl FetchClient {
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::HttpError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, max_bytes: config.max_bytes })
    }

    /// Request `target` and drain its body.
    ///
    /// Non-success statuses are errors: nothing cacheable came back.
    pub async fn warm(&self, target: &str) -> Result<WarmResponse, Error> {
        let started = Instant::now();
        let url = parse_target(target).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let mut response = self
            .http
            .get(url.clone())
            .header(header::ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| transport_error(&url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(format!("{url}: status {}", status.as_u16())));
        }
        let served_from_cache = response.headers().contains_key(CACHE_ENGINE_HEADER);

        let mut size = 0usize;
        while let Some(chunk) = response.chunk().await.map_err(|e| transport_error(&url, &e))? {
            size += chunk.len();
            if size > self.max_bytes {
                return Err(Error::FetchTooLarge(format!("{url}: more than {} bytes", self.max_bytes)));
            }
        }

        let elapsed = started.elapsed();
        tracing::debug!(%url, size, elapsed_ms = elapsed.as_millis() as u64, served_from_cache, "warmed");

        Ok(WarmResponse { url, status, size, elapsed, served_from_cache })
    }
}

fn transport_error(url: &Url, e: &reqwest::Error) -> Error {
    if e.is_timeout() { Error::FetchTimeout(format!("{url}: {e}")) } else { Error::HttpError(format!("{url}: {e}")) }
}
