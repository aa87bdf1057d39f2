//! Cache key generation.
//!
//! Keys are built from an admin-configured template such as
//! `$scheme://$host$request_uri`. The resolved base is optionally replaced by
//! its SHA-256 digest and then prefixed with the meta or data namespace.

use sha2::{Digest, Sha256};
use url::Url;

use crate::config::CacheConfig;

/// Recognised template markers, longest first so that no marker can shadow
/// a longer one sharing its prefix.
pub const PLACEHOLDERS: &[&str] =
    &["$cookie_PHPSESSID", "$session_cookie", "$request_uri", "$remote_user", "$scheme", "$host"];

/// Values substituted into a key template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyContext {
    pub scheme: String,
    pub host: String,
    pub request_uri: String,
    pub remote_user: String,
    pub session_cookie: String,
}

impl KeyContext {
    fn value_for(&self, marker: &str) -> &str {
        match marker {
            "$scheme" => &self.scheme,
            "$host" => &self.host,
            "$request_uri" => &self.request_uri,
            "$remote_user" => &self.remote_user,
            "$session_cookie" | "$cookie_PHPSESSID" => &self.session_cookie,
            _ => "",
        }
    }

    /// Context for an arbitrary URL, keeping `remote_user` and the session
    /// cookie from `defaults`.
    ///
    /// The request URI is the path plus `?query` when present, matching what
    /// the gate keys on; the fragment is dropped.
    pub fn for_url(url: &Url, defaults: &KeyContext) -> Self {
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        Self {
            scheme: url.scheme().to_string(),
            host,
            request_uri: match url.query() {
                Some(query) => format!("{}?{query}", url.path()),
                None => url.path().to_string(),
            },
            remote_user: defaults.remote_user.clone(),
            session_cookie: defaults.session_cookie.clone(),
        }
    }
}

/// Substitute every placeholder in `template` in one left-to-right pass.
///
/// Substituted values are never re-scanned, so a value that itself contains a
/// marker such as `$host` is emitted literally.
pub fn resolve(template: &str, context: &KeyContext) -> String {
    let mut out = String::with_capacity(template.len() + context.request_uri.len() + context.host.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let candidate = &rest[pos..];

        match PLACEHOLDERS.iter().find(|marker| candidate.starts_with(**marker)) {
            Some(marker) => {
                out.push_str(context.value_for(marker));
                rest = &candidate[marker.len()..];
            }
            None => {
                out.push('$');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);

    out
}

/// Hex-encoded SHA-256 digest of a resolved key base.
pub fn digest(base: &str) -> String {
    hex::encode(Sha256::digest(base.as_bytes()))
}

/// Prefix a resolved base, hashing it first when required.
pub fn build_key(prefix: &str, base: &str, hash: bool) -> String {
    if hash { format!("{prefix}{}", digest(base)) } else { format!("{prefix}{base}") }
}

/// Meta and data keys for one logical page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub meta: String,
    pub data: String,
}

/// Builds keys from a site's configuration.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    template: String,
    hash: bool,
    prefix_meta: String,
    prefix_data: String,
}

impl KeyBuilder {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            template: config.key.clone(),
            hash: config.hash_keys(),
            prefix_meta: config.prefix_meta.clone(),
            prefix_data: config.prefix_data.clone(),
        }
    }

    /// Resolve the template against `context`, without prefix or hashing.
    pub fn base(&self, context: &KeyContext) -> String {
        resolve(&self.template, context)
    }

    /// Both keys for an already resolved base.
    pub fn pair_for_base(&self, base: &str) -> KeyPair {
        KeyPair {
            meta: build_key(&self.prefix_meta, base, self.hash),
            data: build_key(&self.prefix_data, base, self.hash),
        }
    }

    pub fn pair(&self, context: &KeyContext) -> KeyPair {
        self.pair_for_base(&self.base(context))
    }

    pub fn hashes(&self) -> bool {
        self.hash
    }
}
