//! Per-request inputs handed to the gate by the hosting web server.

use std::collections::BTreeMap;

use http::{HeaderMap, Method, Request, header};

use fullpage_core::KeyContext;

/// Cookie whose value feeds the `$session_cookie` key placeholder.
pub const SESSION_COOKIE: &str = "PHPSESSID";

/// Everything the cache needs to know about one incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Method,
    pub scheme: String,
    pub host: String,
    /// Path plus query string, exactly as requested.
    pub request_uri: String,
    /// Script that would serve the request; only used by the legacy file-serving exclusion.
    pub script_name: String,
    pub remote_user: String,
    pub cookies: BTreeMap<String, String>,
    /// Set by the host when a server-side session is active for this visitor.
    pub session_id: Option<String>,
    pub if_modified_since: Option<String>,
    /// Address of the serving host, reported in diagnostics.
    pub server_addr: String,
}

impl RequestContext {
    /// A plain GET for `request_uri` on `host`.
    pub fn get(scheme: &str, host: &str, request_uri: &str) -> Self {
        Self {
            method: Method::GET,
            scheme: scheme.to_string(),
            host: host.to_string(),
            request_uri: request_uri.to_string(),
            script_name: String::new(),
            remote_user: String::new(),
            cookies: BTreeMap::new(),
            session_id: None,
            if_modified_since: None,
            server_addr: String::new(),
        }
    }

    /// Build a context from an incoming request.
    ///
    /// The scheme honours `X-Forwarded-Proto: https` from a terminating proxy.
    /// Script name, remote user, session and server address are left for the
    /// host to fill in.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let headers = request.headers();
        let uri = request.uri();

        let forwarded_https = header_str(headers, "x-forwarded-proto").is_some_and(|p| p.eq_ignore_ascii_case("https"));
        let scheme = if forwarded_https { "https" } else { uri.scheme_str().unwrap_or("http") };

        let host = header_str(headers, header::HOST.as_str())
            .map(str::to_string)
            .or_else(|| uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        let request_uri = uri.path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_else(|| "/".into());

        let mut context = Self::get(scheme, &host, &request_uri);
        context.method = request.method().clone();
        context.cookies = parse_cookies(headers);
        context.if_modified_since = header_str(headers, header::IF_MODIFIED_SINCE.as_str()).map(str::to_string);
        context
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        self.request_uri.split_once('?').map_or(self.request_uri.as_str(), |(path, _)| path)
    }

    pub fn has_query(&self) -> bool {
        self.request_uri.contains('?')
    }

    /// Placeholder values for the key template.
    pub fn key_context(&self) -> KeyContext {
        KeyContext {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            request_uri: self.request_uri.clone(),
            remote_user: self.remote_user.clone(),
            session_cookie: self.cookies.get(SESSION_COOKIE).cloned().unwrap_or_default(),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Collect `name=value` pairs from every `Cookie` header.
fn parse_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}
