//! Post adapter trait and built-in adapters for metadata/content extraction.
//!
//! Adapters recognise a publishing platform (the AWS blog, the Builder
//! community site) and pull title, byline, dates, tags and body text out of
//! a rendered post.

mod blog;
mod builder;
mod generic;

use scraper::{ElementRef, Html, Selector};
use url::Url;

pub use blog::BlogAdapter;
pub use builder::BuilderAdapter;
pub use generic::GenericAdapter;

/// Elements whose text never belongs to a post body.
const CHROME_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "noscript"];

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Everything an adapter could extract from one post page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedPost {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<String>,
    pub updated_at: Option<String>,
    pub tags: Vec<String>,
    /// Body text, chrome stripped and whitespace collapsed (not yet truncated).
    pub body: Option<String>,
}

/// Trait for platform-specific post extraction.
///
/// Adapters are tried in priority order; [`GenericAdapter`] is the always-last fallback.
pub trait PostAdapter: Send + Sync {
    /// Returns `true` if this adapter should handle the document.
    fn detect(&self, doc: &Html, url: &Url) -> bool;

    fn extract(&self, doc: &Html) -> ExtractedPost;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered adapters in priority order.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn PostAdapter>>,
    fallback: GenericAdapter,
}

impl AdapterRegistry {
    /// Create a registry with all built-in adapters (platform-specific first).
    pub fn new() -> Self {
        Self {
            adapters: vec![Box::new(BuilderAdapter), Box::new(BlogAdapter)],
            fallback: GenericAdapter,
        }
    }

    /// Detect the best adapter for the given HTML document.
    pub fn detect(&self, doc: &Html, url: &Url) -> &dyn PostAdapter {
        self.adapters
            .iter()
            .find(|adapter| adapter.detect(doc, url))
            .map(|adapter| adapter.as_ref())
            .unwrap_or(&self.fallback)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

/// Trimmed text of the first element matching `css`.
pub(crate) fn first_text(doc: &Html, css: &str) -> Option<String> {
    let sel = Selector::parse(css).ok()?;
    doc.select(&sel)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

/// `content` attribute of the first `<meta>` matching `css`.
pub(crate) fn meta_content(doc: &Html, css: &str) -> Option<String> {
    let sel = Selector::parse(css).ok()?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(String::from)
}

/// Body text of `el`, skipping chrome elements, whitespace collapsed.
pub(crate) fn body_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(el, &mut out);
    collapse_whitespace(&out)
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(child_el) = ElementRef::wrap(child) {
            if !CHROME_TAGS.contains(&child_el.value().name()) {
                collect_text(child_el, out);
            }
        }
    }
}

/// Non-empty trimmed text nodes of `el` in document order; a stand-in for the
/// rendered lines of the element.
pub(crate) fn text_lines(el: ElementRef<'_>) -> Vec<String> {
    el.text()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect()
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Split a comma-separated tag string, dropping empties.
pub(crate) fn split_tags(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn body_text_skips_chrome() {
        let doc = Html::parse_document(
            "<html><body><article><header>Site nav</header><p>Hello\n   world</p>\
             <script>var x = 1;</script><p>Bye</p><footer>(c)</footer></article></body></html>",
        );
        let sel = Selector::parse("article").unwrap();
        let article = doc.select(&sel).next().unwrap();
        assert_eq!(body_text(article), "Hello world Bye");
    }

    #[test]
    fn registry_falls_back_to_generic() {
        let doc = Html::parse_document("<html><body><main><h1>T</h1></main></body></html>");
        let url = Url::parse("https://example.com/some/page").unwrap();
        assert_eq!(AdapterRegistry::new().detect(&doc, &url).name(), "generic");
    }

    #[test]
    fn tags_split() {
        assert_eq!(
            split_tags("Amazon WorkSpaces, , End User Computing"),
            vec!["Amazon WorkSpaces".to_string(), "End User Computing".to_string()]
        );
    }
}
