//! Site content directory.
//!
//! Invalidation and precache need to know what a site publishes: permalinks,
//! content bodies (for pagination markers), taxonomy terms and date archives.
//! The host application exposes that through [`SiteDirectory`];
//! [`ManifestDirectory`] reads the same information from a JSON file.

pub mod manifest;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Error;

pub use manifest::{Manifest, ManifestDirectory};

/// Content kind of a regular post.
pub const KIND_POST: &str = "post";
/// Content kind of a static page.
pub const KIND_PAGE: &str = "page";

/// Content kinds that never have a public URL of their own.
pub const UNLISTED_KINDS: &[&str] = &["revision", "nav_menu_item"];

/// One logical site of a (possibly multi-tenant) installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub id: u64,
    /// Site root URL.
    pub url: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub spam: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl SiteInfo {
    /// Sites that are archived, spam or deleted are not crawled.
    pub fn is_active(&self) -> bool {
        !(self.archived || self.spam || self.deleted)
    }

    /// Root URL with a trailing slash.
    pub fn base_url(&self) -> String {
        if self.url.ends_with('/') { self.url.clone() } else { format!("{}/", self.url) }
    }
}

/// A published content item and its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLink {
    pub id: u64,
    pub kind: String,
    pub permalink: String,
}

/// A taxonomy term listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyTerm {
    pub link: String,
    /// Pretty-permalink slug of the owning taxonomy, e.g. `category`.
    #[serde(default)]
    pub rewrite_slug: Option<String>,
    /// Number of published items carrying the term.
    #[serde(default)]
    pub count: u64,
}

/// Read access to a site's published structure.
#[async_trait]
pub trait SiteDirectory: Send + Sync {
    /// Every site known to the installation, active or not.
    async fn sites(&self) -> Result<Vec<SiteInfo>, Error>;

    /// Canonical URL of a content item; `None` when it has no retrievable path.
    async fn permalink(&self, site_id: u64, content_id: u64) -> Result<Option<String>, Error>;

    /// Raw stored body of a content item.
    async fn content_body(&self, site_id: u64, content_id: u64) -> Result<Option<String>, Error>;

    async fn content_kind(&self, site_id: u64, content_id: u64) -> Result<Option<String>, Error>;

    /// Id of the page configured as the posts index, if any.
    async fn posts_page_id(&self, site_id: u64) -> Result<Option<u64>, Error>;

    /// Published content, links possibly relative to the site root.
    async fn published_content(&self, site_id: u64) -> Result<Vec<ContentLink>, Error>;

    async fn taxonomy_terms(&self, site_id: u64) -> Result<Vec<TaxonomyTerm>, Error>;

    async fn date_archives(&self, site_id: u64) -> Result<Vec<String>, Error>;

    /// The content item a comment belongs to.
    async fn comment_content(&self, site_id: u64, comment_id: u64) -> Result<Option<u64>, Error>;
}

/// Insertion-ordered set of links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSet {
    links: Vec<String>,
    seen: HashSet<String>,
}

impl LinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a link; returns false if it was already present.
    pub fn insert(&mut self, link: impl Into<String>) -> bool {
        let link = link.into();
        if link.is_empty() || !self.seen.insert(link.clone()) {
            return false;
        }
        self.links.push(link);
        true
    }

    pub fn extend<I, S>(&mut self, links: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for link in links {
            self.insert(link);
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.links
    }
}

/// Links of every non-empty taxonomy term plus every date archive of a site.
///
/// A term whose taxonomy has a rewrite slug is also emitted with `/<slug>/`
/// collapsed to `/`, since SEO plugins commonly strip the slug from public URLs.
pub async fn taxonomy_links(directory: &dyn SiteDirectory, site_id: u64, links: &mut LinkSet) -> Result<(), Error> {
    for term in directory.taxonomy_terms(site_id).await? {
        if term.count == 0 {
            continue;
        }

        if let Some(slug) = term.rewrite_slug.as_deref().filter(|s| !s.is_empty()) {
            let stripped = term.link.replace(&format!("/{slug}/"), "/");
            links.insert(term.link);
            links.insert(stripped);
        } else {
            links.insert(term.link);
        }
    }

    links.extend(directory.date_archives(site_id).await?);
    Ok(())
}
