//! AWS blog post adapter.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{
    ExtractedPost, PostAdapter, body_text, collapse_whitespace, first_text, meta_content,
    split_tags,
};

/// "by Jane Doe on 12 MAR 2024" in the post header.
static BYLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bby\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,3})\s+on\s+\d").unwrap()
});

/// First sentence of an author bio: "Jane Doe is a Solutions Architect...".
static BIO_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][a-z]+(?:\s+[A-Z][a-z]+){1,3})\s+(?:is|has|works|serves)\b").unwrap()
});

/// Extracts metadata and body from posts on the AWS blog platform.
pub struct BlogAdapter;

impl PostAdapter for BlogAdapter {
    fn detect(&self, doc: &Html, url: &Url) -> bool {
        if url.path().contains("/blogs/") {
            return true;
        }
        meta_content(doc, r#"meta[property="article:published_time"]"#).is_some()
    }

    fn extract(&self, doc: &Html) -> ExtractedPost {
        ExtractedPost {
            title: extract_title(doc),
            author: extract_author(doc),
            published_at: extract_published(doc),
            updated_at: extract_updated(doc),
            tags: extract_tags(doc),
            body: extract_body(doc),
        }
    }

    fn name(&self) -> &str {
        "blog"
    }
}

fn extract_title(doc: &Html) -> Option<String> {
    first_text(doc, "h1").or_else(|| {
        first_text(doc, "title").and_then(|t| {
            let head = t.split('|').next().unwrap_or_default().trim().to_string();
            (!head.is_empty()).then_some(head)
        })
    })
}

/// Byline sources, most reliable first.
fn extract_author(doc: &Html) -> Option<String> {
    let page_text = collapse_whitespace(&doc.root_element().text().collect::<Vec<_>>().join(" "));
    if let Some(caps) = BYLINE.captures(&page_text) {
        return Some(caps[1].to_string());
    }

    let byline_sel = Selector::parse("div[class*='author'], div[class*='byline']").unwrap();
    let link_sel = Selector::parse("a").unwrap();
    for div in doc.select(&byline_sel) {
        let names: Vec<String> = div
            .select(&link_sel)
            .map(|a| collapse_whitespace(&a.text().collect::<String>()))
            .filter(|name| !name.is_empty())
            .collect();
        if !names.is_empty() {
            return Some(names.join(", "));
        }
        let text = collapse_whitespace(&div.text().collect::<String>());
        if !text.is_empty() {
            return Some(text);
        }
    }

    meta_content(doc, r#"meta[name="author"]"#)
        .or_else(|| meta_content(doc, r#"meta[property="article:author"]"#))
        .or_else(|| author_from_bio(doc))
}

/// Name from the first bio paragraph under an "About the Author(s)" heading.
fn author_from_bio(doc: &Html) -> Option<String> {
    let heading_sel = Selector::parse("h1, h2, h3, h4, h5, strong, b, p").unwrap();
    let inner_sel = Selector::parse("p, td").unwrap();

    let heading = doc.select(&heading_sel).find(|el| {
        collapse_whitespace(&el.text().collect::<String>())
            .to_lowercase()
            .starts_with("about the author")
    })?;

    let mut candidates: Vec<String> = Vec::new();
    for sibling in heading.next_siblings().filter_map(ElementRef::wrap).take(3) {
        candidates.push(collapse_whitespace(&sibling.text().collect::<String>()));
        candidates.extend(
            sibling
                .select(&inner_sel)
                .map(|el| collapse_whitespace(&el.text().collect::<String>())),
        );
    }

    candidates
        .iter()
        .find_map(|text| BIO_NAME.captures(text).map(|caps| caps[1].to_string()))
}

fn extract_published(doc: &Html) -> Option<String> {
    let time_sel = Selector::parse("time[datetime]").unwrap();
    doc.select(&time_sel)
        .filter_map(|el| el.value().attr("datetime"))
        .map(str::trim)
        .find(|dt| !dt.is_empty())
        .map(String::from)
        .or_else(|| meta_content(doc, r#"meta[property="article:published_time"]"#))
        .or_else(|| meta_content(doc, r#"meta[name="date"]"#))
        .or_else(|| meta_content(doc, r#"meta[name="publish_date"]"#))
}

fn extract_updated(doc: &Html) -> Option<String> {
    let sel = Selector::parse("time[class*='updated'], time[class*='modified']").unwrap();
    doc.select(&sel)
        .find_map(|el| {
            el.value()
                .attr("datetime")
                .map(|dt| dt.trim().to_string())
                .or_else(|| Some(collapse_whitespace(&el.text().collect::<String>())))
                .filter(|dt| !dt.is_empty())
        })
        .or_else(|| meta_content(doc, r#"meta[property="article:modified_time"]"#))
}

fn extract_tags(doc: &Html) -> Vec<String> {
    let tag_sel = Selector::parse("div[class*='tags'], div[class*='categories']").unwrap();
    let link_sel = Selector::parse("a").unwrap();

    let mut tags: Vec<String> = Vec::new();
    for div in doc.select(&tag_sel) {
        for tag in div
            .select(&link_sel)
            .map(|a| collapse_whitespace(&a.text().collect::<String>()))
        {
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    if !tags.is_empty() {
        return tags;
    }

    let meta_sel = Selector::parse(r#"meta[property="article:tag"], meta[name="keywords"]"#).unwrap();
    for content in doc.select(&meta_sel).filter_map(|el| el.value().attr("content")) {
        for tag in split_tags(content) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}

fn extract_body(doc: &Html) -> Option<String> {
    let selectors = [
        "article",
        "div[class*='post-body'], div[class*='entry-content'], div[class*='content']",
        "main",
    ];
    selectors.iter().find_map(|css| {
        let sel = Selector::parse(css).unwrap();
        doc.select(&sel)
            .next()
            .map(body_text)
            .filter(|text| !text.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST: &str = r#"<html><head>
        <title>Scaling AppStream 2.0 | Desktop and Application Streaming</title>
        <meta property="article:modified_time" content="2024-03-20T08:00:00Z">
        <meta name="keywords" content="Amazon AppStream 2.0, End User Computing">
    </head><body>
        <header><nav>Blog Home</nav></header>
        <article>
            <h1>Scaling AppStream 2.0 fleets</h1>
            <footer>by Jane Doe and John Roe on 12 MAR 2024 in Amazon AppStream 2.0</footer>
            <time datetime="2024-03-12T09:00:00-07:00">12 MAR 2024</time>
            <p>AppStream fleets can scale on schedules.</p>
            <script>trackPageView();</script>
            <h2>About the Authors</h2>
            <p>Jane Doe is a Senior Solutions Architect at AWS.</p>
        </article>
    </body></html>"#;

    fn url() -> Url {
        Url::parse("https://aws.amazon.com/blogs/desktop-and-application-streaming/scaling/").unwrap()
    }

    #[test]
    fn detects_blog_urls() {
        let doc = Html::parse_document(POST);
        assert!(BlogAdapter.detect(&doc, &url()));
        let other = Url::parse("https://builder.aws.com/content/x").unwrap();
        assert!(!BlogAdapter.detect(&Html::parse_document("<html></html>"), &other));
    }

    #[test]
    fn extracts_post_fields() {
        let doc = Html::parse_document(POST);
        let post = BlogAdapter.extract(&doc);

        assert_eq!(post.title.as_deref(), Some("Scaling AppStream 2.0 fleets"));
        assert_eq!(post.published_at.as_deref(), Some("2024-03-12T09:00:00-07:00"));
        assert_eq!(post.updated_at.as_deref(), Some("2024-03-20T08:00:00Z"));
        assert_eq!(post.tags, vec!["Amazon AppStream 2.0", "End User Computing"]);

        let body = post.body.unwrap();
        assert!(body.contains("fleets can scale"));
        assert!(!body.contains("trackPageView"));
    }

    #[test]
    fn byline_regex_takes_first_author() {
        let doc = Html::parse_document(POST);
        // "by Jane Doe and John Roe on 12" does not match; the bio fallback does.
        assert_eq!(BlogAdapter.extract(&doc).author.as_deref(), Some("Jane Doe"));

        let doc = Html::parse_document(
            "<html><body><article><p>by Maria Lopez on 02 JAN 2024</p></article></body></html>",
        );
        assert_eq!(BlogAdapter.extract(&doc).author.as_deref(), Some("Maria Lopez"));
    }

    #[test]
    fn author_div_links_are_joined() {
        let doc = Html::parse_document(
            r#"<html><body><div class="blog-post-author">
                <a href="/a">Ana Silva</a><a href="/b">Ben Ode</a></div></body></html>"#,
        );
        assert_eq!(
            BlogAdapter.extract(&doc).author.as_deref(),
            Some("Ana Silva, Ben Ode")
        );
    }

    #[test]
    fn title_from_head_when_no_h1() {
        let doc = Html::parse_document(
            "<html><head><title>WorkSpaces Pools | AWS Blog</title></head><body></body></html>",
        );
        assert_eq!(BlogAdapter.extract(&doc).title.as_deref(), Some("WorkSpaces Pools"));
    }

    #[test]
    fn tags_from_category_links() {
        let doc = Html::parse_document(
            r#"<html><body><div class="blog-post-categories">
                <a>Amazon WorkSpaces</a><a>Amazon WorkSpaces</a><a>Security</a></div></body></html>"#,
        );
        assert_eq!(BlogAdapter.extract(&doc).tags, vec!["Amazon WorkSpaces", "Security"]);
    }
}
