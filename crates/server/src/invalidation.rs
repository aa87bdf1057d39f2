//! Content-change invalidation.
//!
//! A change to one content item maps to a set of key bases according to the
//! configured [`InvalidationMethod`]. The set is passed through an ordered
//! chain of key-set transformers, expanded to meta and data keys, and deleted.

use std::collections::BTreeSet;
use std::sync::Arc;

use url::Url;

use fullpage_core::site::{self, KIND_POST};
use fullpage_core::{Backend, CacheConfig, Error, InvalidationMethod, KeyBuilder, KeyContext, LinkSet, SiteDirectory};

/// Page-break marker inside a content body.
pub const PAGE_BREAK: &str = "<!--nextpage-->";

/// A pure rewrite of the candidate key-base set.
pub type KeyTransformer = Box<dyn Fn(BTreeSet<String>) -> BTreeSet<String> + Send + Sync>;

/// Adds a `feed`-suffixed variant of every base.
pub fn feed_variants(bases: BTreeSet<String>) -> BTreeSet<String> {
    let feeds: Vec<String> = bases.iter().map(|base| format!("{base}feed")).collect();
    bases.into_iter().chain(feeds).collect()
}

/// A change in the site's content, as reported by the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentEvent {
    StatusTransition { content_id: u64, from: String, to: String },
    Edited(u64),
    Deleted(u64),
    CommentPosted { comment_id: u64 },
    CommentEdited { comment_id: u64 },
    CommentTrashed { comment_id: u64 },
    Pingback { comment_id: u64 },
    Trackback { comment_id: u64 },
    ThemeSwitched,
}

impl ContentEvent {
    fn comment_id(&self) -> Option<u64> {
        match self {
            ContentEvent::CommentPosted { comment_id }
            | ContentEvent::CommentEdited { comment_id }
            | ContentEvent::CommentTrashed { comment_id }
            | ContentEvent::Pingback { comment_id }
            | ContentEvent::Trackback { comment_id } => Some(*comment_id),
            _ => None,
        }
    }
}

/// What a clear request ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The backend is not alive; nothing was attempted.
    Offline,
    /// No content id and no force flag.
    Skipped,
    /// Whole namespace flushed; carries the engine's result.
    Flushed(bool),
    /// These meta and data keys were deleted.
    Cleared(BTreeSet<String>),
}

/// Maps content changes of one site to cache deletions.
pub struct InvalidationEngine {
    config: Arc<CacheConfig>,
    backend: Arc<Backend>,
    directory: Arc<dyn SiteDirectory>,
    site_id: u64,
    keys: KeyBuilder,
    transformers: Vec<KeyTransformer>,
}

impl InvalidationEngine {
    /// An engine with an empty transformer chain.
    pub fn new(
        config: Arc<CacheConfig>, backend: Arc<Backend>, directory: Arc<dyn SiteDirectory>, site_id: u64,
    ) -> Self {
        let keys = KeyBuilder::new(&config);
        Self { config, backend, directory, site_id, keys, transformers: Vec::new() }
    }

    /// Append a transformer; transformers run in registration order.
    pub fn with_transformer<F>(mut self, transformer: F) -> Self
    where
        F: Fn(BTreeSet<String>) -> BTreeSet<String> + Send + Sync + 'static,
    {
        self.transformers.push(Box::new(transformer));
        self
    }

    /// The administrative default chain: [`feed_variants`].
    pub fn with_default_transformers(self) -> Self {
        self.with_transformer(feed_variants)
    }

    /// Invalidate after `content_id` changed, or flush everything when `force` is set.
    ///
    /// # Errors
    ///
    /// Returns `PermalinkUnresolvable` when the content has no retrievable URL,
    /// in which case nothing is cleared for it, and directory errors as-is.
    pub async fn clear(&self, content_id: Option<u64>, force: bool) -> Result<ClearOutcome, Error> {
        if !self.backend.is_alive() {
            return Ok(ClearOutcome::Offline);
        }

        if content_id.is_none() && !force {
            tracing::warn!("not clearing unidentified content");
            return Ok(ClearOutcome::Skipped);
        }

        let method = self.config.invalidation_method;
        if method == InvalidationMethod::Flush || force {
            return Ok(ClearOutcome::Flushed(self.backend.flush().await));
        }

        let mut cleared = BTreeSet::new();
        let mut bases = BTreeSet::new();

        if method == InvalidationMethod::Taxonomies {
            let mut links = LinkSet::new();
            site::taxonomy_links(self.directory.as_ref(), self.site_id, &mut links).await?;
            bases.extend(links.iter().filter_map(|link| self.base_for_link(link)));
        }

        if let Some(id) = content_id {
            match self.content_bases(id).await {
                Ok(variants) => bases.extend(variants),
                Err(e) => {
                    tracing::warn!(content_id = id, error = %e, "unable to determine path from permalink");
                    return Err(e);
                }
            }

            if method == InvalidationMethod::PostsIndex {
                cleared.extend(self.clear_posts_index(id).await?);
            }
        }

        cleared.extend(self.clear_bases(bases).await);
        tracing::info!(?content_id, keys = cleared.len(), "cache entries invalidated");
        Ok(ClearOutcome::Cleared(cleared))
    }

    /// Route a content event to [`InvalidationEngine::clear`].
    ///
    /// Comment activity is ignored unless `comments_invalidate` is set. A theme
    /// switch flushes everything. Failures are logged, never returned.
    pub async fn dispatch(&self, event: &ContentEvent) -> Option<ClearOutcome> {
        let result = match event {
            ContentEvent::StatusTransition { content_id, .. }
            | ContentEvent::Edited(content_id)
            | ContentEvent::Deleted(content_id) => self.clear(Some(*content_id), false).await,
            ContentEvent::ThemeSwitched => self.clear(None, true).await,
            other => {
                if !self.config.comments_invalidate {
                    return None;
                }
                let comment_id = other.comment_id()?;
                match self.directory.comment_content(self.site_id, comment_id).await {
                    Ok(Some(content_id)) => self.clear(Some(content_id), false).await,
                    Ok(None) => {
                        tracing::debug!(comment_id, "comment has no parent content");
                        return None;
                    }
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(?event, error = %e, "invalidation failed");
                None
            }
        }
    }

    /// Posts index page of the site, when `id` is a post other than that page.
    async fn clear_posts_index(&self, id: u64) -> Result<BTreeSet<String>, Error> {
        let Some(index) = self.directory.posts_page_id(self.site_id).await? else {
            return Ok(BTreeSet::new());
        };
        let kind = self.directory.content_kind(self.site_id, id).await?;
        if index == id || kind.as_deref() != Some(KIND_POST) {
            return Ok(BTreeSet::new());
        }

        match self.content_bases(index).await {
            Ok(bases) => Ok(self.clear_bases(bases.into_iter().collect()).await),
            Err(e) => {
                tracing::warn!(content_id = index, error = %e, "unable to clear posts index");
                Ok(BTreeSet::new())
            }
        }
    }

    /// Key bases of every paginated variant of a content item.
    ///
    /// Page numbers are appended to the path; a permalink query is kept on
    /// every variant.
    pub async fn content_bases(&self, id: u64) -> Result<Vec<String>, Error> {
        let permalink = self
            .directory
            .permalink(self.site_id, id)
            .await?
            .filter(|p| !p.trim().is_empty())
            .ok_or(Error::PermalinkUnresolvable(id))?;
        let url = Url::parse(permalink.trim()).map_err(|_| Error::PermalinkUnresolvable(id))?;

        let body = self.directory.content_body(self.site_id, id).await?.unwrap_or_default();
        let pages = 1 + body.matches(PAGE_BREAK).count();

        let context = KeyContext::for_url(&url, &KeyContext::default());
        let mut bases = vec![self.keys.base(&context)];

        let path = url.path().trim_end_matches('/');
        let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();
        for page in 2..=pages {
            let paged = KeyContext { request_uri: format!("{path}/{page}/{query}"), ..context.clone() };
            bases.push(self.keys.base(&paged));
        }
        Ok(bases)
    }

    fn base_for_link(&self, link: &str) -> Option<String> {
        match Url::parse(link) {
            Ok(url) => Some(self.keys.base(&KeyContext::for_url(&url, &KeyContext::default()))),
            Err(e) => {
                tracing::debug!(link, error = %e, "skipping unparsable link");
                None
            }
        }
    }

    /// Run the transformer chain, expand to meta and data keys, delete them.
    async fn clear_bases(&self, bases: BTreeSet<String>) -> BTreeSet<String> {
        let bases = self.transformers.iter().fold(bases, |set, transform| transform(set));

        let keys: BTreeSet<String> = bases
            .iter()
            .flat_map(|base| {
                let pair = self.keys.pair_for_base(base);
                [pair.meta, pair.data]
            })
            .collect();

        self.backend.clear(&keys).await;
        keys
    }
}
