//! Core domain types for the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EucHubError, Result};

/// Author written by the metadata-only (slow) fetcher.
pub const AUTHOR_PLACEHOLDER: &str = "AWS Builder Community";

/// Body written by the metadata-only (slow) fetcher.
pub const BODY_PLACEHOLDER: &str = "Builder.AWS article. Visit the full article on Builder.AWS for detailed information and insights.";

/// Author used for fast-source posts that carry no byline.
pub const MULTIPLE_AUTHORS: &str = "Multiple Authors";

/// Tags attached to every slow-source item.
pub const BUILDER_TAGS: [&str; 2] = ["End User Computing", "Builder.AWS"];

/// Prefix that namespaces slow-source ids away from fast-source slugs.
const SLOW_ID_PREFIX: &str = "builder-";

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// The two content sources the pipeline ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Blog listing crawl; metadata fetch already yields real body text.
    Fast,
    /// Sitemap index; needs a full-content fetch before summarization.
    Slow,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
        }
    }

    /// First enrichment stage a NEW/CHANGED item of this source is enrolled in.
    pub fn entry_stage(self) -> Stage {
        match self {
            Self::Fast => Stage::Summarize,
            Self::Slow => Stage::FetchContent,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = EucHubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(Self::Fast),
            "slow" => Ok(Self::Slow),
            other => Err(EucHubError::validation(format!("unknown source '{other}'"))),
        }
    }
}

/// The `source` field of an invocation payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSelector {
    Fast,
    Slow,
    All,
}

impl SourceSelector {
    /// Concrete sources covered by this selector, in crawl order.
    pub fn sources(self) -> Vec<SourceKind> {
        match self {
            Self::Fast => vec![SourceKind::Fast],
            Self::Slow => vec![SourceKind::Slow],
            Self::All => vec![SourceKind::Fast, SourceKind::Slow],
        }
    }
}

impl std::str::FromStr for SourceSelector {
    type Err = EucHubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(Self::Fast),
            "slow" => Ok(Self::Slow),
            "all" => Ok(Self::All),
            other => Err(EucHubError::validation(format!("unknown source '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ItemId
// ---------------------------------------------------------------------------

/// Stable item identifier, a pure function of the source URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Derive the id from the last non-empty path segment of `url`.
    ///
    /// Slow-source ids carry a `builder-` prefix so the two sources never collide.
    pub fn from_source_url(source: SourceKind, url: &Url) -> Result<Self> {
        let slug = url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .ok_or_else(|| EucHubError::validation(format!("no slug in URL {url}")))?;

        Ok(match source {
            SourceKind::Fast => Self(slug.to_string()),
            SourceKind::Slow => Self(format!("{SLOW_ID_PREFIX}{slug}")),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// ContentLabel
// ---------------------------------------------------------------------------

/// Classification labels produced by the classify stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentLabel {
    #[serde(rename = "Announcement")]
    Announcement,
    #[serde(rename = "Best Practices")]
    BestPractices,
    #[serde(rename = "Curation")]
    Curation,
    #[serde(rename = "Customer Story")]
    CustomerStory,
    #[serde(rename = "Technical How-To")]
    TechnicalHowTo,
    #[serde(rename = "Thought Leadership")]
    ThoughtLeadership,
}

impl ContentLabel {
    pub const ALL: [ContentLabel; 6] = [
        Self::Announcement,
        Self::BestPractices,
        Self::Curation,
        Self::CustomerStory,
        Self::TechnicalHowTo,
        Self::ThoughtLeadership,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Announcement => "Announcement",
            Self::BestPractices => "Best Practices",
            Self::Curation => "Curation",
            Self::CustomerStory => "Customer Story",
            Self::TechnicalHowTo => "Technical How-To",
            Self::ThoughtLeadership => "Thought Leadership",
        }
    }

    /// Exact (case-insensitive) match on the display name.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(s))
    }

    /// Like [`ContentLabel::parse`], but also accepts a response that merely
    /// contains a label name, e.g. `"Label: Technical How-To."`.
    pub fn match_loose(s: &str) -> Option<Self> {
        if let Some(label) = Self::parse(s) {
            return Some(label);
        }
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|label| lower.contains(&label.as_str().to_lowercase()))
    }
}

impl std::fmt::Display for ContentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Item / FetchedItem
// ---------------------------------------------------------------------------

/// One ingested blog post as held by the item store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub source: SourceKind,
    pub source_url: String,
    pub title: String,
    #[serde(default)]
    pub tag_list: Vec<String>,
    pub published_at: Option<String>,
    /// Last-modified time as reported by the source (the change signal).
    pub updated_at: Option<String>,
    pub author_display: Option<String>,
    pub body_text: Option<String>,
    pub ai_summary: Option<String>,
    pub content_label: Option<ContentLabel>,
    pub label_confidence: Option<f32>,
    pub last_ingested_at: DateTime<Utc>,
}

impl Item {
    /// Whether the body is still the slow fetcher's placeholder (or missing).
    pub fn has_placeholder_body(&self) -> bool {
        self.body_text
            .as_deref()
            .is_none_or(|body| body == BODY_PLACEHOLDER)
    }
}

/// Normalized output of a metadata fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedItem {
    pub id: ItemId,
    pub source: SourceKind,
    pub source_url: String,
    pub title: String,
    pub tag_list: Vec<String>,
    pub published_at: String,
    pub updated_at: String,
    pub author_display: String,
    /// Empty when the page had no extractable body; stored as absent.
    pub body_text: String,
}

// ---------------------------------------------------------------------------
// Stages & invocation
// ---------------------------------------------------------------------------

/// Enrichment stages, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FetchContent,
    Summarize,
    Classify,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchContent => "fetch_content",
            Self::Summarize => "summarize",
            Self::Classify => "classify",
        }
    }

    /// Stage enqueued when a batch of this stage completes.
    pub fn next(self) -> Option<Stage> {
        match self {
            Self::FetchContent => Some(Self::Summarize),
            Self::Summarize => Some(Self::Classify),
            Self::Classify => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = EucHubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fetch_content" => Ok(Self::FetchContent),
            "summarize" => Ok(Self::Summarize),
            "classify" => Ok(Self::Classify),
            other => Err(EucHubError::validation(format!("unknown stage '{other}'"))),
        }
    }
}

/// Explicit trigger for one pipeline run: `{"source": "slow", "item_ids": [...]}`.
///
/// Without `item_ids` the run performs full discovery; with them it enrolls
/// exactly those ids into their source's enrichment chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationPayload {
    pub source: SourceSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_ids: Option<Vec<ItemId>>,
}

impl InvocationPayload {
    pub fn discovery(source: SourceSelector) -> Self {
        Self {
            source,
            item_ids: None,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| EucHubError::validation(format!("invalid invocation payload: {e}")))
    }
}
