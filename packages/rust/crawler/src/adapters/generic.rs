//! Generic (fallback) post adapter.
//!
//! Always matches. Uses standard meta tags and the usual content containers.

use scraper::{Html, Selector};
use url::Url;

use super::{ExtractedPost, PostAdapter, body_text, first_text, meta_content, split_tags};

/// Generic adapter that works on arbitrary HTML pages.
pub struct GenericAdapter;

impl PostAdapter for GenericAdapter {
    fn detect(&self, _doc: &Html, _url: &Url) -> bool {
        true
    }

    fn extract(&self, doc: &Html) -> ExtractedPost {
        let title = first_text(doc, "h1")
            .or_else(|| meta_content(doc, r#"meta[property="og:title"]"#))
            .or_else(|| first_text(doc, "title"));

        let body = ["article", "main", r#"[role="main"]"#, "body"]
            .iter()
            .find_map(|css| {
                let sel = Selector::parse(css).unwrap();
                doc.select(&sel)
                    .next()
                    .map(body_text)
                    .filter(|text| !text.is_empty())
            });

        ExtractedPost {
            title,
            author: meta_content(doc, r#"meta[name="author"]"#),
            published_at: meta_content(doc, r#"meta[property="article:published_time"]"#),
            updated_at: meta_content(doc, r#"meta[property="article:modified_time"]"#),
            tags: meta_content(doc, r#"meta[name="keywords"]"#)
                .map(|k| split_tags(&k))
                .unwrap_or_default(),
            body,
        }
    }

    fn name(&self) -> &str {
        "generic"
    }
}
