//! Per-site cache configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::record::ContentType;

/// Storage engine selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process memory store.
    Local,
    /// memcached servers over the text protocol.
    Memcache,
    /// memcached servers over the binary protocol, with optional SASL.
    Memcached,
    /// Single SQLite database file.
    Sqlite,
}

impl BackendKind {
    /// Engines that only accept digests as keys.
    pub fn requires_hashed_keys(self) -> bool {
        matches!(self, BackendKind::Sqlite)
    }

    /// Engines that talk to a pool of `host:port` / `unix://` servers.
    pub fn is_pooled(self) -> bool {
        matches!(self, BackendKind::Memcache | BackendKind::Memcached)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Memcache => "memcache",
            BackendKind::Memcached => "memcached",
            BackendKind::Sqlite => "sqlite",
        }
    }
}

/// What a content change clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum InvalidationMethod {
    /// 0: flush the whole namespace.
    Flush,
    /// 1: only the changed content.
    Single,
    /// 2: the changed content plus every taxonomy-term and date-archive page.
    Taxonomies,
    /// 3: the changed content plus the posts index page.
    PostsIndex,
}

impl TryFrom<u8> for InvalidationMethod {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(InvalidationMethod::Flush),
            1 => Ok(InvalidationMethod::Single),
            2 => Ok(InvalidationMethod::Taxonomies),
            3 => Ok(InvalidationMethod::PostsIndex),
            other => Err(format!("invalidation_method must be 0-3, got {other}")),
        }
    }
}

impl From<InvalidationMethod> for u8 {
    fn from(method: InvalidationMethod) -> Self {
        match method {
            InvalidationMethod::Flush => 0,
            InvalidationMethod::Single => 1,
            InvalidationMethod::Taxonomies => 2,
            InvalidationMethod::PostsIndex => 3,
        }
    }
}

/// Resolved cache configuration for one site (or the whole network).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Storage engine.
    #[serde(default = "default_cache_type")]
    pub cache_type: BackendKind,

    /// Comma-separated `host:port` or `unix://path` entries for pooled engines.
    #[serde(default = "default_hosts")]
    pub hosts: String,

    /// Database file for the sqlite engine.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Key template; see `keys::PLACEHOLDERS` for the recognised markers.
    #[serde(default = "default_key")]
    pub key: String,

    /// Replace the resolved key base by its digest.
    #[serde(default)]
    pub hashkey: bool,

    #[serde(default = "default_prefix_meta")]
    pub prefix_meta: String,

    #[serde(default = "default_prefix_data")]
    pub prefix_data: String,

    /// Server-side TTL in seconds; 0 stores without expiry.
    #[serde(default = "default_expire")]
    pub expire: u64,

    /// Server-side TTL for home and feed pages; unset falls back to `expire`.
    #[serde(default)]
    pub expire_home: Option<u64>,

    /// Server-side TTL for archives; unset falls back to `expire`.
    #[serde(default)]
    pub expire_taxonomy: Option<u64>,

    /// Browser cache TTL for singles and pages; 0 disables browser caching.
    #[serde(default)]
    pub browsercache: u64,

    #[serde(default)]
    pub browsercache_home: u64,

    #[serde(default)]
    pub browsercache_taxonomy: u64,

    #[serde(default = "default_invalidation_method")]
    pub invalidation_method: InvalidationMethod,

    #[serde(default)]
    pub nocache_home: bool,

    #[serde(default)]
    pub nocache_feed: bool,

    #[serde(default)]
    pub nocache_archive: bool,

    #[serde(default)]
    pub nocache_single: bool,

    #[serde(default)]
    pub nocache_page: bool,

    /// Skip request URIs carrying a query string.
    #[serde(default)]
    pub nocache_dyn: bool,

    /// Case-insensitive regex over the request URI; empty disables.
    #[serde(default)]
    pub nocache_url: String,

    /// Regex over the generated body; a match prevents storing. Empty disables.
    #[serde(default)]
    pub nocache_comment: String,

    /// Cookie name prefixes that exclude a request.
    #[serde(default)]
    pub nocache_cookies: Vec<String>,

    /// Serve and store pages for visitors carrying authentication cookies.
    #[serde(default)]
    pub cache_loggedin: bool,

    /// Cookie name prefixes that mark an authenticated visitor.
    #[serde(default = "default_auth_cookies")]
    pub auth_cookies: Vec<String>,

    /// Invalidate on comment activity.
    #[serde(default = "default_true")]
    pub comments_invalidate: bool,

    /// Emit the `X-Cache-Engine` diagnostic header on hits.
    #[serde(default)]
    pub response_header: bool,

    /// Insert timing comments before `</body>`.
    #[serde(default)]
    pub generate_time: bool,

    /// Emit `X-Pingback` on hits when a pingback URL was stored.
    #[serde(default)]
    pub pingback_header: bool,

    #[serde(default = "default_charset")]
    pub charset: String,

    /// Use the binary protocol for the memcached engine.
    #[serde(default)]
    pub memcached_binary: bool,

    /// SASL credentials (binary protocol only).
    #[serde(default)]
    pub authuser: Option<String>,

    #[serde(default)]
    pub authpass: Option<String>,

    /// Enables the legacy multi-tenant file-serving exclusion.
    #[serde(default)]
    pub multisite: bool,
}

fn default_cache_type() -> BackendKind {
    BackendKind::Memcached
}

fn default_hosts() -> String {
    "127.0.0.1:11211".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./fullpage-cache.sqlite")
}

fn default_key() -> String {
    "$scheme://$host$request_uri".into()
}

fn default_prefix_meta() -> String {
    "meta-".into()
}

fn default_prefix_data() -> String {
    "data-".into()
}

fn default_expire() -> u64 {
    300
}

fn default_invalidation_method() -> InvalidationMethod {
    InvalidationMethod::Flush
}

fn default_auth_cookies() -> Vec<String> {
    ["comment_author_", "wordpressuser_", "wp-postpass_", "wordpress_logged_in_"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_charset() -> String {
    "utf-8".into()
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: default_cache_type(),
            hosts: default_hosts(),
            db_path: default_db_path(),
            key: default_key(),
            hashkey: false,
            prefix_meta: default_prefix_meta(),
            prefix_data: default_prefix_data(),
            expire: default_expire(),
            expire_home: None,
            expire_taxonomy: None,
            browsercache: 0,
            browsercache_home: 0,
            browsercache_taxonomy: 0,
            invalidation_method: default_invalidation_method(),
            nocache_home: false,
            nocache_feed: false,
            nocache_archive: false,
            nocache_single: false,
            nocache_page: false,
            nocache_dyn: false,
            nocache_url: String::new(),
            nocache_comment: String::new(),
            nocache_cookies: Vec::new(),
            cache_loggedin: false,
            auth_cookies: default_auth_cookies(),
            comments_invalidate: true,
            response_header: false,
            generate_time: false,
            pingback_header: false,
            charset: default_charset(),
            memcached_binary: false,
            authuser: None,
            authpass: None,
            multisite: false,
        }
    }
}

impl CacheConfig {
    /// Whether resolved key bases are replaced by their digest.
    pub fn hash_keys(&self) -> bool {
        self.hashkey || self.cache_type.requires_hashed_keys()
    }

    /// Server-side TTL for a content type, in seconds. 0 means no expiry.
    pub fn server_ttl(&self, content_type: ContentType) -> u64 {
        match content_type {
            ContentType::Home | ContentType::Feed => self.expire_home.unwrap_or(self.expire),
            ContentType::Archive => self.expire_taxonomy.unwrap_or(self.expire),
            _ => self.expire,
        }
    }

    /// Browser cache TTL for a content type, in seconds. 0 disables browser caching.
    pub fn browser_ttl(&self, content_type: ContentType) -> u64 {
        match content_type {
            ContentType::Home | ContentType::Feed => self.browsercache_home,
            ContentType::Archive => self.browsercache_taxonomy,
            ContentType::Single | ContentType::Page => self.browsercache,
            ContentType::Unknown => 0,
        }
    }

    /// Whether the type has been opted out of caching.
    pub fn excludes(&self, content_type: ContentType) -> bool {
        match content_type {
            ContentType::Home => self.nocache_home,
            ContentType::Feed => self.nocache_feed,
            ContentType::Archive => self.nocache_archive,
            ContentType::Single => self.nocache_single,
            ContentType::Page => self.nocache_page,
            ContentType::Unknown => false,
        }
    }

    /// Cookie prefixes that exclude a request from caching.
    pub fn excluded_cookie_prefixes(&self) -> impl Iterator<Item = &str> {
        let auth: &[String] = if self.cache_loggedin { &[] } else { &self.auth_cookies };
        auth.iter()
            .chain(self.nocache_cookies.iter())
            .map(|prefix| prefix.trim())
            .filter(|prefix| !prefix.is_empty())
    }

    /// SASL credentials, when both halves are set and non-empty.
    pub fn sasl_credentials(&self) -> Option<(&str, &str)> {
        match (self.authuser.as_deref(), self.authpass.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}
