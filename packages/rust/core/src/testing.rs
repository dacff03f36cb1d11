//! Fakes and fixtures shared by the pipeline tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use euchub_crawler::{ContentFetcher, IndexFetch, MetadataFetcher, PageContent};
use euchub_shared::{
    AUTHOR_PLACEHOLDER, BODY_PLACEHOLDER, BUILDER_TAGS, ContentLabel, Environment, EucHubError,
    FetchedItem, Item, ItemId, PipelineConfig, Result, SourceKind,
};
use euchub_storage::{MemoryQueue, MemoryStore};

use crate::llm::{GenerateError, TextGenerator};
use crate::pipeline::PipelineContext;

/// Metadata fetcher returning a fixed index, or failing outright.
pub struct StaticFetcher {
    source: SourceKind,
    items: Option<Vec<FetchedItem>>,
}

impl StaticFetcher {
    pub fn new(source: SourceKind, items: Vec<FetchedItem>) -> Self {
        Self {
            source,
            items: Some(items),
        }
    }

    pub fn failing(source: SourceKind) -> Self {
        Self {
            source,
            items: None,
        }
    }
}

#[async_trait]
impl MetadataFetcher for StaticFetcher {
    fn source(&self) -> SourceKind {
        self.source
    }

    async fn fetch_index(&self) -> Result<IndexFetch> {
        match &self.items {
            Some(items) => Ok(IndexFetch {
                items: items.clone(),
                failures: Vec::new(),
            }),
            None => Err(EucHubError::Network(format!("{} index unreachable", self.source))),
        }
    }
}

type Script = dyn Fn(&str) -> std::result::Result<String, GenerateError> + Send + Sync;

/// Text generator answering every prompt through a closure.
pub struct ScriptedGenerator {
    script: Box<Script>,
}

impl ScriptedGenerator {
    pub fn new(
        script: impl Fn(&str) -> std::result::Result<String, GenerateError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _max_tokens: u32,
    ) -> std::result::Result<String, GenerateError> {
        (self.script)(prompt)
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

enum ContentBehaviour {
    NoAuthor,
    Page(PageContent),
    Hang,
}

/// Content fetcher with a fixed answer for every item.
pub struct StaticContent {
    behaviour: ContentBehaviour,
}

impl StaticContent {
    pub fn no_author() -> Self {
        Self {
            behaviour: ContentBehaviour::NoAuthor,
        }
    }

    pub fn author(author: &str, body: &str) -> Self {
        Self {
            behaviour: ContentBehaviour::Page(PageContent {
                title: None,
                author: author.to_string(),
                body: body.to_string(),
            }),
        }
    }

    /// Never resolves.
    pub fn hanging() -> Self {
        Self {
            behaviour: ContentBehaviour::Hang,
        }
    }
}

#[async_trait]
impl ContentFetcher for StaticContent {
    async fn fetch_content(&self, _item: &Item) -> Result<Option<PageContent>> {
        match &self.behaviour {
            ContentBehaviour::NoAuthor => Ok(None),
            ContentBehaviour::Page(page) => Ok(Some(page.clone())),
            ContentBehaviour::Hang => std::future::pending().await,
        }
    }
}

pub fn context(store: Arc<MemoryStore>, queue: Arc<MemoryQueue>) -> PipelineContext {
    context_with(
        store,
        queue,
        vec![
            Arc::new(StaticFetcher::new(SourceKind::Fast, Vec::new())),
            Arc::new(StaticFetcher::new(SourceKind::Slow, Vec::new())),
        ],
    )
}

pub fn context_with(
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    fetchers: Vec<Arc<dyn MetadataFetcher>>,
) -> PipelineContext {
    PipelineContext {
        environment: Environment::Staging,
        config: PipelineConfig::default(),
        store,
        queue,
        generator: None,
        content: Arc::new(StaticContent::no_author()),
        fetchers,
    }
}

/// A fast-source item with a real body and no enrichment yet.
pub fn fast_item(id: &str, updated_at: &str) -> Item {
    Item {
        id: ItemId::from(id),
        source: SourceKind::Fast,
        source_url: format!("https://aws.amazon.com/blogs/desktop-and-application-streaming/{id}/"),
        title: format!("Title {id}"),
        tag_list: vec!["Amazon WorkSpaces".into()],
        published_at: Some(updated_at.to_string()),
        updated_at: Some(updated_at.to_string()),
        author_display: Some("Sam Builder".into()),
        body_text: Some("Step one: open the console. Step two: create a fleet and stack. ".repeat(3)),
        ai_summary: None,
        content_label: None,
        label_confidence: None,
        last_ingested_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

/// A slow-source item as first ingested: placeholders only.
pub fn placeholder_item(id: &str, updated_at: &str) -> Item {
    Item {
        id: ItemId::from(id),
        source: SourceKind::Slow,
        source_url: format!("https://builder.aws.com/content/{id}"),
        title: format!("Title {id}"),
        tag_list: BUILDER_TAGS.iter().map(|t| t.to_string()).collect(),
        published_at: Some(updated_at.to_string()),
        updated_at: Some(updated_at.to_string()),
        author_display: Some(AUTHOR_PLACEHOLDER.into()),
        body_text: Some(BODY_PLACEHOLDER.into()),
        ai_summary: None,
        content_label: None,
        label_confidence: None,
        last_ingested_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

/// A slow-source item that has been through every stage.
pub fn enriched_item(id: &str, updated_at: &str) -> Item {
    Item {
        author_display: Some("Jane Doe".into()),
        body_text: Some("Full article text about AppStream 2.0 fleets and scaling policies.".into()),
        ai_summary: Some("S1".into()),
        content_label: Some(ContentLabel::TechnicalHowTo),
        label_confidence: Some(0.8),
        ..placeholder_item(id, updated_at)
    }
}

/// What the slow fetcher yields for a sitemap entry.
pub fn slow_fetched(id: &str, updated_at: &str) -> FetchedItem {
    FetchedItem {
        id: ItemId::from(id),
        source: SourceKind::Slow,
        source_url: format!("https://builder.aws.com/content/{id}"),
        title: format!("Title {id}"),
        tag_list: BUILDER_TAGS.iter().map(|t| t.to_string()).collect(),
        published_at: updated_at.to_string(),
        updated_at: updated_at.to_string(),
        author_display: AUTHOR_PLACEHOLDER.into(),
        body_text: BODY_PLACEHOLDER.into(),
    }
}
