//! Source fetchers: the two metadata fetchers and the full-content fetcher.
//!
//! Metadata fetchers turn a source's index into [`FetchedItem`]s. A failure
//! to read the index itself is an error; a failure on a single post or child
//! sitemap is recorded in [`IndexFetch::failures`] and the walk continues.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use tracing::{debug, info, instrument, warn};
use url::Url;

use euchub_discovery::{is_relevant, parse_listing, parse_sitemap, title_from_slug};
use euchub_shared::{
    AUTHOR_PLACEHOLDER, BODY_PLACEHOLDER, BUILDER_TAGS, EucHubError, FastSourceConfig,
    FetchedItem, Item, ItemId, MULTIPLE_AUTHORS, Result, SlowSourceConfig, SourceKind,
};

use crate::adapters::{AdapterRegistry, BuilderAdapter, PostAdapter, truncate_chars};
use crate::engine::HttpFetcher;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A URL that could not be turned into a [`FetchedItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub url: String,
    pub error: String,
}

/// Result of walking one source's index.
#[derive(Debug, Clone, Default)]
pub struct IndexFetch {
    pub items: Vec<FetchedItem>,
    pub failures: Vec<FetchFailure>,
}

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    fn source(&self) -> SourceKind;

    /// Walk the source's index and return every item it currently lists.
    async fn fetch_index(&self) -> Result<IndexFetch>;
}

/// What the full-content fetch extracts from an article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub title: Option<String>,
    pub author: String,
    pub body: String,
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch the rendered page for `item`. `Ok(None)` means the page carried no
    /// recognisable author and the item should be left alone.
    async fn fetch_content(&self, item: &Item) -> Result<Option<PageContent>>;
}

// ---------------------------------------------------------------------------
// Fast source: blog listing
// ---------------------------------------------------------------------------

/// Walks the paginated blog listing and extracts every post it links to.
pub struct FastSourceFetcher {
    http: Arc<HttpFetcher>,
    config: FastSourceConfig,
    body_max_chars: usize,
    registry: AdapterRegistry,
}

impl FastSourceFetcher {
    pub fn new(http: Arc<HttpFetcher>, config: FastSourceConfig, body_max_chars: usize) -> Self {
        Self {
            http,
            config,
            body_max_chars,
            registry: AdapterRegistry::new(),
        }
    }

    /// Collect post URLs across listing pages, oldest pages last.
    async fn discover_posts(&self, root: &Url) -> Result<Vec<Url>> {
        let mut visited: HashSet<Url> = HashSet::new();
        let mut posts: Vec<Url> = Vec::new();
        let mut next = Some(root.clone());
        let mut pages: u32 = 0;

        while let Some(page_url) = next.take() {
            if self.config.max_pages.is_some_and(|max| pages >= max) || !visited.insert(page_url.clone()) {
                break;
            }
            pages += 1;

            let html = match self.http.fetch_text(&page_url).await {
                Ok(html) => html,
                Err(e) if pages == 1 => return Err(e),
                Err(e) => {
                    warn!(page = %page_url, error = %e, "listing page failed, stopping pagination");
                    break;
                }
            };

            let listing = parse_listing(&html, &page_url, root);
            debug!(page = %page_url, posts = listing.post_urls.len(), "parsed listing page");
            for url in listing.post_urls {
                if !posts.contains(&url) {
                    posts.push(url);
                }
            }
            next = listing.next_page;
        }

        info!(pages, posts = posts.len(), "listing walk complete");
        Ok(posts)
    }

    async fn fetch_post(&self, url: &Url) -> Result<FetchedItem> {
        let html = self.http.fetch_text(url).await?;
        let doc = Html::parse_document(&html);
        let adapter = self.registry.detect(&doc, url);
        let post = adapter.extract(&doc);
        debug!(url = %url, adapter = adapter.name(), "extracted post");

        let id = ItemId::from_source_url(SourceKind::Fast, url)?;
        let (published_at, updated_at) = match (post.published_at, post.updated_at) {
            (Some(published), Some(updated)) => (published, updated),
            (Some(published), None) => (published.clone(), published),
            (None, Some(updated)) => (updated.clone(), updated),
            (None, None) => {
                return Err(EucHubError::parse(format!("{url}: no published or modified date")));
            }
        };

        Ok(FetchedItem {
            id,
            source: SourceKind::Fast,
            source_url: url.to_string(),
            title: post.title.unwrap_or_else(|| title_from_slug(url.as_str())),
            tag_list: post.tags,
            published_at,
            updated_at,
            author_display: post.author.unwrap_or_else(|| MULTIPLE_AUTHORS.to_string()),
            body_text: truncate_chars(&post.body.unwrap_or_default(), self.body_max_chars),
        })
    }
}

#[async_trait]
impl MetadataFetcher for FastSourceFetcher {
    fn source(&self) -> SourceKind {
        SourceKind::Fast
    }

    #[instrument(skip_all, fields(source = "fast"))]
    async fn fetch_index(&self) -> Result<IndexFetch> {
        let root = Url::parse(&self.config.listing_url).map_err(|e| {
            EucHubError::config(format!("invalid listing_url '{}': {e}", self.config.listing_url))
        })?;

        let mut out = IndexFetch::default();
        for url in self.discover_posts(&root).await? {
            match self.fetch_post(&url).await {
                Ok(item) => out.items.push(item),
                Err(e) => {
                    warn!(url = %url, error = %e, "post fetch failed");
                    out.failures.push(FetchFailure {
                        url: url.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Slow source: sitemap
// ---------------------------------------------------------------------------

/// Reads the sitemap index and per-month article sitemaps. Never fetches the
/// articles themselves; author and body are placeholders.
pub struct SlowSourceFetcher {
    http: Arc<HttpFetcher>,
    config: SlowSourceConfig,
}

impl SlowSourceFetcher {
    pub fn new(http: Arc<HttpFetcher>, config: SlowSourceConfig) -> Self {
        Self { http, config }
    }

    fn to_item(&self, loc: &str, lastmod: &str) -> Result<Option<FetchedItem>> {
        let title = title_from_slug(loc);
        if !is_relevant(loc, &title, &self.config.keywords) {
            return Ok(None);
        }
        let url = Url::parse(loc).map_err(|e| EucHubError::parse(format!("bad loc '{loc}': {e}")))?;

        Ok(Some(FetchedItem {
            id: ItemId::from_source_url(SourceKind::Slow, &url)?,
            source: SourceKind::Slow,
            source_url: loc.to_string(),
            title,
            tag_list: BUILDER_TAGS.iter().map(|t| t.to_string()).collect(),
            published_at: lastmod.to_string(),
            updated_at: lastmod.to_string(),
            author_display: AUTHOR_PLACEHOLDER.to_string(),
            body_text: BODY_PLACEHOLDER.to_string(),
        }))
    }
}

#[async_trait]
impl MetadataFetcher for SlowSourceFetcher {
    fn source(&self) -> SourceKind {
        SourceKind::Slow
    }

    #[instrument(skip_all, fields(source = "slow"))]
    async fn fetch_index(&self) -> Result<IndexFetch> {
        let index_url = Url::parse(&self.config.sitemap_index_url).map_err(|e| {
            EucHubError::config(format!(
                "invalid sitemap_index_url '{}': {e}",
                self.config.sitemap_index_url
            ))
        })?;
        let index = parse_sitemap(&self.http.fetch_text(&index_url).await?)?;
        let sitemaps = index.article_sitemaps(&self.config.article_sitemap_marker);
        info!(sitemaps = sitemaps.len(), "article sitemaps discovered");

        let mut out = IndexFetch::default();
        let mut seen: HashSet<ItemId> = HashSet::new();

        for sitemap in sitemaps {
            let entries = match Url::parse(&sitemap) {
                Ok(url) => match self.http.fetch_text(&url).await {
                    Ok(xml) => parse_sitemap(&xml).map(|doc| doc.dated_entries()),
                    Err(e) => Err(e),
                },
                Err(e) => Err(EucHubError::parse(format!("bad sitemap url: {e}"))),
            };

            let entries = match entries {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(sitemap = %sitemap, error = %e, "article sitemap skipped");
                    out.failures.push(FetchFailure {
                        url: sitemap,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            for (loc, lastmod) in entries {
                match self.to_item(&loc, &lastmod) {
                    Ok(Some(item)) => {
                        if seen.insert(item.id.clone()) {
                            out.items.push(item);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => out.failures.push(FetchFailure {
                        url: loc,
                        error: e.to_string(),
                    }),
                }
            }
        }

        info!(items = out.items.len(), "relevant entries collected");
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Full content
// ---------------------------------------------------------------------------

/// Fetches one article page and pulls the real author and body out of it.
pub struct FullContentFetcher {
    http: Arc<HttpFetcher>,
    body_max_chars: usize,
}

impl FullContentFetcher {
    pub fn new(http: Arc<HttpFetcher>, body_max_chars: usize) -> Self {
        Self {
            http,
            body_max_chars,
        }
    }
}

#[async_trait]
impl ContentFetcher for FullContentFetcher {
    #[instrument(skip_all, fields(id = %item.id))]
    async fn fetch_content(&self, item: &Item) -> Result<Option<PageContent>> {
        let url = Url::parse(&item.source_url)
            .map_err(|e| EucHubError::parse(format!("bad source_url '{}': {e}", item.source_url)))?;
        let html = self.http.fetch_text(&url).await?;
        let post = BuilderAdapter.extract(&Html::parse_document(&html));

        let Some(author) = post.author else {
            debug!("no author on page");
            return Ok(None);
        };

        Ok(Some(PageContent {
            title: post.title,
            author,
            body: truncate_chars(&post.body.unwrap_or_default(), self.body_max_chars),
        }))
    }
}
