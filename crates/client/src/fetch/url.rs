//! Precache target parsing and link resolution.

use reqwest::Url;

/// Why a work-file line is not a fetchable target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("blank line")]
    Blank,

    #[error("scheme {0:?} is not fetched")]
    Scheme(String),

    #[error("malformed URL: {0}")]
    Malformed(String),
}

/// Parse one precache target.
///
/// Only absolute `http`/`https` URLs pass. The host is lowercased and the
/// fragment dropped; path and query are kept as written.
pub fn parse_target(line: &str) -> Result<Url, TargetError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(TargetError::Blank);
    }

    let mut url = Url::parse(line).map_err(|e| TargetError::Malformed(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(TargetError::Scheme(url.scheme().to_string()));
    }

    let lowered = url.host_str().map(str::to_ascii_lowercase);
    if let Some(host) = lowered {
        url.set_host(Some(&host)).map_err(|e| TargetError::Malformed(e.to_string()))?;
    }
    url.set_fragment(None);
    Ok(url)
}

/// Make a site link absolute.
///
/// Links that already start with the site base or carry their own scheme are
/// returned unchanged; anything else is treated as relative to `base_url`.
pub fn absolutize(base_url: &str, link: &str) -> String {
    let link = link.trim();
    if link.starts_with(base_url) || link.contains("://") {
        return link.to_string();
    }

    format!("{}/{}", base_url.trim_end_matches('/'), link.trim_start_matches('/'))
}
