//! JSON manifest implementation of [`SiteDirectory`].
//!
//! ```json
//! {
//!   "sites": [{
//!     "id": 1,
//!     "url": "https://example.com",
//!     "posts_page_id": 10,
//!     "content": [{"id": 42, "kind": "post", "permalink": "/hello/", "body": "..."}],
//!     "terms": [{"link": "https://example.com/category/news/", "rewrite_slug": "category", "count": 3}],
//!     "date_archives": ["https://example.com/2024/01/"],
//!     "comments": [{"id": 7, "content_id": 42}]
//!   }]
//! }
//! ```

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ContentLink, SiteDirectory, SiteInfo, TaxonomyTerm};
use crate::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub sites: Vec<ManifestSite>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSite {
    #[serde(flatten)]
    pub info: SiteInfo,
    #[serde(default)]
    pub posts_page_id: Option<u64>,
    #[serde(default)]
    pub content: Vec<ManifestContent>,
    #[serde(default)]
    pub terms: Vec<TaxonomyTerm>,
    #[serde(default)]
    pub date_archives: Vec<String>,
    #[serde(default)]
    pub comments: Vec<ManifestComment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestContent {
    pub id: u64,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestComment {
    pub id: u64,
    pub content_id: u64,
}

fn default_kind() -> String {
    super::KIND_POST.into()
}

fn default_status() -> String {
    "publish".into()
}

/// Read-only directory over a parsed manifest.
#[derive(Debug, Clone, Default)]
pub struct ManifestDirectory {
    manifest: Manifest,
}

impl ManifestDirectory {
    pub fn new(manifest: Manifest) -> Self {
        Self { manifest }
    }

    /// Read and parse a manifest file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = tokio::fs::read(path.as_ref()).await?;
        let manifest: Manifest = serde_json::from_slice(&raw)?;
        tracing::debug!(path = %path.as_ref().display(), sites = manifest.sites.len(), "site manifest loaded");
        Ok(Self::new(manifest))
    }

    fn site(&self, site_id: u64) -> Option<&ManifestSite> {
        self.manifest.sites.iter().find(|s| s.info.id == site_id)
    }

    fn content(&self, site_id: u64, content_id: u64) -> Option<&ManifestContent> {
        self.site(site_id)?.content.iter().find(|c| c.id == content_id)
    }
}

#[async_trait]
impl SiteDirectory for ManifestDirectory {
    async fn sites(&self) -> Result<Vec<SiteInfo>, Error> {
        Ok(self.manifest.sites.iter().map(|s| s.info.clone()).collect())
    }

    async fn permalink(&self, site_id: u64, content_id: u64) -> Result<Option<String>, Error> {
        Ok(self
            .content(site_id, content_id)
            .and_then(|c| c.permalink.clone())
            .filter(|p| !p.is_empty()))
    }

    async fn content_body(&self, site_id: u64, content_id: u64) -> Result<Option<String>, Error> {
        Ok(self.content(site_id, content_id).map(|c| c.body.clone()))
    }

    async fn content_kind(&self, site_id: u64, content_id: u64) -> Result<Option<String>, Error> {
        Ok(self.content(site_id, content_id).map(|c| c.kind.clone()))
    }

    async fn posts_page_id(&self, site_id: u64) -> Result<Option<u64>, Error> {
        Ok(self.site(site_id).and_then(|s| s.posts_page_id))
    }

    async fn published_content(&self, site_id: u64) -> Result<Vec<ContentLink>, Error> {
        let Some(site) = self.site(site_id) else {
            return Ok(Vec::new());
        };

        Ok(site
            .content
            .iter()
            .filter(|c| c.status == "publish")
            .filter_map(|c| {
                let permalink = c.permalink.clone().filter(|p| !p.is_empty())?;
                Some(ContentLink { id: c.id, kind: c.kind.clone(), permalink })
            })
            .collect())
    }

    async fn taxonomy_terms(&self, site_id: u64) -> Result<Vec<TaxonomyTerm>, Error> {
        Ok(self.site(site_id).map(|s| s.terms.clone()).unwrap_or_default())
    }

    async fn date_archives(&self, site_id: u64) -> Result<Vec<String>, Error> {
        Ok(self.site(site_id).map(|s| s.date_archives.clone()).unwrap_or_default())
    }

    async fn comment_content(&self, site_id: u64, comment_id: u64) -> Result<Option<u64>, Error> {
        Ok(self
            .site(site_id)
            .and_then(|s| s.comments.iter().find(|c| c.id == comment_id))
            .map(|c| c.content_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "sites": [
            {
                "id": 1,
                "url": "https://example.com",
                "posts_page_id": 10,
                "content": [
                    {"id": 42, "kind": "post", "permalink": "https://example.com/hello/", "body": "a<!--nextpage-->b"},
                    {"id": 43, "kind": "post", "status": "draft", "permalink": "https://example.com/draft/"},
                    {"id": 44, "kind": "page"}
                ],
                "comments": [{"id": 7, "content_id": 42}]
            },
            {"id": 2, "url": "https://b.example", "archived": true}
        ]
    }"#;

    fn directory() -> ManifestDirectory {
        ManifestDirectory::new(serde_json::from_str(MANIFEST).unwrap())
    }

    #[tokio::test]
    async fn test_lookup_content() {
        let dir = directory();
        assert_eq!(dir.permalink(1, 42).await.unwrap().as_deref(), Some("https://example.com/hello/"));
        assert_eq!(dir.permalink(1, 44).await.unwrap(), None);
        assert_eq!(dir.permalink(1, 999).await.unwrap(), None);
        assert_eq!(dir.content_kind(1, 44).await.unwrap().as_deref(), Some("page"));
        assert_eq!(dir.posts_page_id(1).await.unwrap(), Some(10));
        assert_eq!(dir.comment_content(1, 7).await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_published_only() {
        let published = directory().published_content(1).await.unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, 42);
    }

    #[tokio::test]
    async fn test_sites_flags() {
        let sites = directory().sites().await.unwrap();
        assert_eq!(sites.len(), 2);
        assert!(sites[0].is_active());
        assert!(!sites[1].is_active());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.json");
        tokio::fs::write(&path, MANIFEST).await.unwrap();

        let loaded = ManifestDirectory::load(&path).await.unwrap();
        assert_eq!(loaded.sites().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = ManifestDirectory::load("/nonexistent/fullpage-site.json").await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
