//! Builder community article adapter.
//!
//! Builder pages are rendered client-side with hashed CSS-module class names,
//! so the author card is located by the stable `_profile_` fragment of its
//! class and, failing that, by the "Follow" button that sits next to the name.

use scraper::{Html, Selector};
use url::Url;

use super::{ExtractedPost, PostAdapter, body_text, first_text, text_lines};

const BUILDER_HOST: &str = "builder.aws.com";

/// Lines in the profile card that are never the author's name.
const PROFILE_NOISE: &[&str] = &["Follow", "AWS Employee"];

/// How many lines after the title are searched for the "Follow" button.
const FOLLOW_WINDOW: usize = 5;

/// Extracts the author and body of a Builder community article.
pub struct BuilderAdapter;

impl PostAdapter for BuilderAdapter {
    fn detect(&self, doc: &Html, url: &Url) -> bool {
        if url.host_str() == Some(BUILDER_HOST) {
            return true;
        }
        let profile_sel = Selector::parse("[class*='_profile_']").unwrap();
        doc.select(&profile_sel).next().is_some()
    }

    fn extract(&self, doc: &Html) -> ExtractedPost {
        let title = first_text(doc, "h1");
        let author = author_from_profile(doc).or_else(|| author_near_follow(doc, title.as_deref()));

        let time_sel = Selector::parse("time[datetime]").unwrap();
        let published_at = doc
            .select(&time_sel)
            .filter_map(|el| el.value().attr("datetime"))
            .map(|dt| dt.trim().to_string())
            .find(|dt| !dt.is_empty());

        let body = ["article", "main"].iter().find_map(|css| {
            let sel = Selector::parse(css).unwrap();
            doc.select(&sel)
                .next()
                .map(body_text)
                .filter(|text| !text.is_empty())
        });

        ExtractedPost {
            title,
            author,
            published_at,
            updated_at: None,
            tags: Vec::new(),
            body,
        }
    }

    fn name(&self) -> &str {
        "builder"
    }
}

fn author_from_profile(doc: &Html) -> Option<String> {
    let profile_sel = Selector::parse("[class*='_profile_']").unwrap();
    doc.select(&profile_sel).find_map(|card| {
        text_lines(card)
            .into_iter()
            .find(|line| !PROFILE_NOISE.contains(&line.as_str()))
    })
}

/// The line right before a "Follow" button, when it looks like a person's name.
fn author_near_follow(doc: &Html, title: Option<&str>) -> Option<String> {
    let lines = text_lines(doc.root_element());
    let start = title
        .and_then(|t| lines.iter().position(|line| line == t))
        .map_or(0, |idx| idx + 1);

    let window: Vec<&String> = lines.iter().skip(start).take(FOLLOW_WINDOW).collect();
    window
        .iter()
        .enumerate()
        .filter(|(i, line)| *i > 0 && line.as_str() == "Follow")
        .map(|(i, _)| window[i - 1])
        .find(|candidate| looks_like_name(candidate))
        .cloned()
}

fn looks_like_name(line: &str) -> bool {
    let words: Vec<&str> = line.split_whitespace().collect();
    (2..=4).contains(&words.len())
        && words
            .iter()
            .all(|w| w.chars().next().is_some_and(char::is_uppercase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_from_profile_card() {
        let doc = Html::parse_document(
            r#"<html><body><main><h1>WorkSpaces tips</h1>
               <div class="Card_profile_x1y2"><span>AWS Employee</span><span>Priya Raman</span>
                   <button>Follow</button></div>
               <article><p>Ten tips for WorkSpaces.</p></article></main></body></html>"#,
        );
        let post = BuilderAdapter.extract(&doc);
        assert_eq!(post.author.as_deref(), Some("Priya Raman"));
        assert_eq!(post.title.as_deref(), Some("WorkSpaces tips"));
        assert_eq!(post.body.as_deref(), Some("Ten tips for WorkSpaces."));
    }

    #[test]
    fn author_before_follow_button() {
        let doc = Html::parse_document(
            r#"<html><body><main><h1>Streaming at scale</h1>
               <div><span>Li Wei Chen</span><button>Follow</button></div>
               <p>Body text here.</p></main></body></html>"#,
        );
        assert_eq!(BuilderAdapter.extract(&doc).author.as_deref(), Some("Li Wei Chen"));
    }

    #[test]
    fn non_name_before_follow_is_ignored() {
        let doc = Html::parse_document(
            r#"<html><body><main><h1>T</h1>
               <div><span>posted yesterday</span><button>Follow</button></div></main></body></html>"#,
        );
        assert_eq!(BuilderAdapter.extract(&doc).author, None);
    }

    #[test]
    fn detects_by_host() {
        let url = Url::parse("https://builder.aws.com/content/2abc/x").unwrap();
        assert!(BuilderAdapter.detect(&Html::parse_document("<html></html>"), &url));
    }
}
