//! Blog listing page parsing for the fast source.
//!
//! A listing page yields the post URLs it links to and, optionally, the URL
//! of the next (older) listing page.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static PAGE_LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/page/\d+/?$").unwrap());
static OLDER_POSTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)older posts").unwrap());

/// Path segments that mark archive/navigation pages, never posts.
const NON_POST_SEGMENTS: &[&str] = &["category", "tag", "page", "author", "feed"];

/// Links found on one listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Post URLs in document order, deduplicated.
    pub post_urls: Vec<Url>,
    /// The next (older) listing page, if any.
    pub next_page: Option<Url>,
}

/// Parse a listing page fetched from `page_url`, keeping only posts under `root`.
pub fn parse_listing(html: &str, page_url: &Url, root: &Url) -> ListingPage {
    let doc = Html::parse_document(html);

    // Prefer the first link of each article card; fall back to every link.
    let card_sel = Selector::parse("article, div[class*='post'], div[class*='article'], div[class*='entry']").unwrap();
    let link_sel = Selector::parse("a[href]").unwrap();

    let mut post_urls: Vec<Url> = Vec::new();

    for card in doc.select(&card_sel) {
        if let Some(url) = card
            .select(&link_sel)
            .next()
            .and_then(|a| resolve(a, page_url))
            .filter(|url| is_post_url(url, root))
        {
            push_unique(&mut post_urls, url);
        }
    }

    if post_urls.is_empty() {
        for url in doc
            .select(&link_sel)
            .filter_map(|a| resolve(a, page_url))
            .filter(|url| is_post_url(url, root))
        {
            push_unique(&mut post_urls, url);
        }
    }

    ListingPage {
        post_urls,
        next_page: find_next_page(&doc, page_url, root),
    }
}

fn push_unique(urls: &mut Vec<Url>, url: Url) {
    if !urls.contains(&url) {
        urls.push(url);
    }
}

fn find_next_page(doc: &Html, page_url: &Url, root: &Url) -> Option<Url> {
    let link_sel = Selector::parse("a[href]").unwrap();

    let older = doc
        .select(&link_sel)
        .filter(|a| OLDER_POSTS.is_match(&a.text().collect::<String>()))
        .filter_map(|a| resolve(a, page_url))
        .find(|url| is_under(url, root));
    if older.is_some() {
        return older;
    }

    doc.select(&link_sel)
        .filter_map(|a| resolve(a, page_url))
        .find(|url| is_under(url, root) && PAGE_LINK.is_match(url.path()) && url != page_url)
}

/// Resolve an anchor's href against the page, dropping fragment and query.
fn resolve(anchor: ElementRef<'_>, base: &Url) -> Option<Url> {
    let href = anchor.value().attr("href")?.trim();
    if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    url.set_query(None);
    Some(url)
}

fn is_under(url: &Url, root: &Url) -> bool {
    url.host_str() == root.host_str() && url.path().starts_with(root.path())
}

/// A post lives under the listing root, at least one segment deeper, and is
/// not an archive page.
pub fn is_post_url(url: &Url, root: &Url) -> bool {
    if !is_under(url, root) {
        return false;
    }
    let rest: Vec<&str> = url.path()[root.path().len()..]
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    !rest.is_empty() && !rest.iter().any(|s| NON_POST_SEGMENTS.contains(s))
}
