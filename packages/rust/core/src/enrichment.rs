//! Prompt construction and response parsing for the enrichment stages.

use serde::Deserialize;

use euchub_shared::{ContentLabel, Item};

/// Completion budget for a summary.
const SUMMARY_MAX_TOKENS: u32 = 200;

/// Completion budget for a classification (label, confidence, reasoning).
const CLASSIFY_MAX_TOKENS: u32 = 300;

/// Bodies shorter than this are not worth summarizing.
pub const MIN_SUMMARY_BODY_CHARS: usize = 50;

/// Body characters included in either prompt.
const PROMPT_BODY_CHARS: usize = 2000;

/// Enrichment task kinds, one per generating stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Summarize,
    Classify,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Classify => "classify",
        }
    }

    /// Completion budget requested from the generator.
    pub fn max_tokens(&self) -> u32 {
        match self {
            Self::Summarize => SUMMARY_MAX_TOKENS,
            Self::Classify => CLASSIFY_MAX_TOKENS,
        }
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Why an item was passed over by the summarize stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoBody,
    BodyTooShort,
    PlaceholderBody,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoBody => "no body",
            Self::BodyTooShort => "body too short",
            Self::PlaceholderBody => "placeholder body",
        }
    }
}

/// The body to summarize, or why there is none worth summarizing.
pub fn summarizable_body(item: &Item) -> Result<&str, SkipReason> {
    let body = item.body_text.as_deref().ok_or(SkipReason::NoBody)?;
    if item.has_placeholder_body() {
        return Err(SkipReason::PlaceholderBody);
    }
    if body.trim().chars().count() < MIN_SUMMARY_BODY_CHARS {
        return Err(SkipReason::BodyTooShort);
    }
    Ok(body)
}

pub fn summary_prompt(item: &Item, body: &str) -> String {
    format!(
        "You are a technical writer creating concise summaries of AWS blog posts.\n\n\
         Blog Title: {title}\n\
         Tags: {tags}\n\n\
         Blog Content:\n{content}\n\n\
         Task: Write a 2-3 sentence summary that captures the main topic and key takeaways \
         of this blog post. Focus on what the post teaches or demonstrates. Be concise and technical.\n\n\
         Summary:",
        title = item.title,
        tags = item.tag_list.join(", "),
        content = truncate_content(body, PROMPT_BODY_CHARS),
    )
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

const LABEL_GUIDE: &str = "\
1. Announcement - Promotes releases, events, open-source code, or new tools. Usually short, foundational level.
2. Best Practices - Shows patterns, anti-patterns, how to build better applications. Intermediate to expert level.
3. Curation - Helps discover other content and events: guides, collections, roundups.
4. Customer Story - Highlights how a customer solved a technical challenge.
5. Technical How-To - Provides how-to content with step-by-step instructions or code examples.
6. Thought Leadership - Sets context on broader technical challenges, trends and the future of a field.";

pub fn classify_prompt(item: &Item) -> String {
    format!(
        "You are an expert at classifying AWS blog posts into categories.\n\n\
         Analyze the following blog post and classify it into ONE of these 6 categories:\n\n\
         {LABEL_GUIDE}\n\n\
         Blog Post:\n\
         Title: {title}\n\
         Tags: {tags}\n\
         Summary: {summary}\n\
         Content Preview: {content}\n\n\
         Respond in JSON format:\n\
         {{\"label\": \"one of the 6 categories exactly as written above\", \
         \"confidence\": 0.0 to 1.0, \
         \"reasoning\": \"brief explanation of why this category fits\"}}",
        title = item.title,
        tags = item.tag_list.join(", "),
        summary = item.ai_summary.as_deref().unwrap_or(""),
        content = truncate_content(item.body_text.as_deref().unwrap_or(""), PROMPT_BODY_CHARS),
    )
}

/// A validated classification result.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: ContentLabel,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f32,
    pub reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    label: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Default confidence when the model omits one.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Parse a classifier response. Returns `None` when there is no JSON object
/// or the label names none of the six categories.
pub fn parse_classification(response: &str) -> Option<Classification> {
    let raw: RawClassification = serde_json::from_str(extract_json(response)).ok()?;
    let label = ContentLabel::match_loose(&raw.label)?;
    let confidence = raw.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0) as f32;

    Some(Classification {
        label,
        confidence,
        reasoning: raw.reasoning.filter(|r| !r.trim().is_empty()),
    })
}

/// Strip a Markdown code fence (```json or bare ```) around a JSON payload.
pub fn extract_json(response: &str) -> &str {
    let text = response.trim();
    let inner = if let Some(start) = text.find("```json") {
        Some(&text[start + "```json".len()..])
    } else {
        text.find("```").map(|start| &text[start + 3..])
    };

    match inner {
        Some(rest) => rest.find("```").map_or(rest, |end| &rest[..end]).trim(),
        None => text,
    }
}

/// Truncate content for a prompt on a char boundary.
fn truncate_content(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use euchub_shared::{BODY_PLACEHOLDER, ItemId, SourceKind};

    fn item(body: Option<&str>) -> Item {
        Item {
            id: ItemId::from("x"),
            source: SourceKind::Fast,
            source_url: "https://aws.amazon.com/blogs/x/".into(),
            title: "Scaling AppStream".into(),
            tag_list: vec!["Amazon AppStream 2.0".into(), "EUC".into()],
            published_at: None,
            updated_at: None,
            author_display: None,
            body_text: body.map(String::from),
            ai_summary: Some("It scales.".into()),
            content_label: None,
            label_confidence: None,
            last_ingested_at: Utc::now(),
        }
    }

    #[test]
    fn summarizable_body_rules() {
        assert_eq!(summarizable_body(&item(None)), Err(SkipReason::NoBody));
        assert_eq!(
            summarizable_body(&item(Some(BODY_PLACEHOLDER))),
            Err(SkipReason::PlaceholderBody)
        );
        assert_eq!(summarizable_body(&item(Some("short"))), Err(SkipReason::BodyTooShort));
        let long = "x".repeat(60);
        assert_eq!(summarizable_body(&item(Some(&long))), Ok(long.as_str()));
    }

    #[test]
    fn summary_prompt_bounds_body() {
        let body = "é".repeat(5000);
        let it = item(Some(&body));
        let prompt = summary_prompt(&it, &body);
        assert!(prompt.contains("Scaling AppStream"));
        assert!(prompt.contains("Amazon AppStream 2.0, EUC"));
        assert!(prompt.contains("2-3 sentence summary"));
        assert_eq!(prompt.matches('é').count(), 2000);
    }

    #[test]
    fn classify_prompt_lists_all_labels() {
        let prompt = classify_prompt(&item(Some("body")));
        for label in ContentLabel::ALL {
            assert!(prompt.contains(label.as_str()), "{label}");
        }
        assert!(prompt.contains("It scales."));
    }

    #[test]
    fn parses_fenced_json() {
        let response = "Here you go:\n```json\n{\"label\": \"Customer Story\", \"confidence\": 0.82, \"reasoning\": \"names a customer\"}\n```";
        let c = parse_classification(response).unwrap();
        assert_eq!(c.label, ContentLabel::CustomerStory);
        assert!((c.confidence - 0.82).abs() < 1e-6);
        assert_eq!(c.reasoning.as_deref(), Some("names a customer"));
    }

    #[test]
    fn loose_label_and_clamped_confidence() {
        let c = parse_classification(r#"{"label": "Category: technical how-to", "confidence": 1.7}"#)
            .unwrap();
        assert_eq!(c.label, ContentLabel::TechnicalHowTo);
        assert_eq!(c.confidence, 1.0);

        let c = parse_classification(r#"{"label": "Curation"}"#).unwrap();
        assert_eq!(c.confidence, 0.5);
    }

    #[test]
    fn rejects_unusable_responses() {
        assert!(parse_classification("I think it's an announcement").is_none());
        assert!(parse_classification(r#"{"label": "Tutorial", "confidence": 0.9}"#).is_none());
    }

    #[test]
    fn extract_json_variants() {
        assert_eq!(extract_json("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(extract_json("```json {\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn task_budgets() {
        assert_eq!(TaskType::Summarize.max_tokens(), 200);
        assert_eq!(TaskType::Classify.as_str(), "classify");
    }
}
