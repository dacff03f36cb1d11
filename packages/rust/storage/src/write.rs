//! Field-level write descriptions for the item store.
//!
//! An [`ItemWrite`] lists, per field, whether the value overwrites, is set
//! only when the stored field is absent, or clears the field. Fields not
//! named in the write are left untouched by both store backends.

use chrono::{DateTime, Utc};
use euchub_shared::{ContentLabel, EucHubError, Item, ItemId, Result, SourceKind};

/// Columns of the `items` table that a write may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemField {
    Source,
    SourceUrl,
    Title,
    TagList,
    PublishedAt,
    UpdatedAt,
    AuthorDisplay,
    BodyText,
    AiSummary,
    ContentLabel,
    LabelConfidence,
    LastIngestedAt,
}

impl ItemField {
    /// Fields computed by the enrichment stages.
    pub const DERIVED: [ItemField; 3] = [Self::AiSummary, Self::ContentLabel, Self::LabelConfidence];

    pub fn column(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::SourceUrl => "source_url",
            Self::Title => "title",
            Self::TagList => "tag_list",
            Self::PublishedAt => "published_at",
            Self::UpdatedAt => "updated_at",
            Self::AuthorDisplay => "author_display",
            Self::BodyText => "body_text",
            Self::AiSummary => "ai_summary",
            Self::ContentLabel => "content_label",
            Self::LabelConfidence => "label_confidence",
            Self::LastIngestedAt => "last_ingested_at",
        }
    }
}

/// A typed value destined for one column.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Tags(Vec<String>),
    Real(f64),
    Timestamp(DateTime<Utc>),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(tags: Vec<String>) -> Self {
        Self::Tags(tags)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<SourceKind> for FieldValue {
    fn from(source: SourceKind) -> Self {
        Self::Text(source.as_str().to_string())
    }
}

impl From<ContentLabel> for FieldValue {
    fn from(label: ContentLabel) -> Self {
        Self::Text(label.as_str().to_string())
    }
}

impl FieldValue {
    pub(crate) fn to_sql(&self) -> Result<libsql::Value> {
        Ok(match self {
            Self::Text(s) => libsql::Value::Text(s.clone()),
            Self::Tags(tags) => libsql::Value::Text(
                serde_json::to_string(tags).map_err(|e| EucHubError::Storage(e.to_string()))?,
            ),
            Self::Real(v) => libsql::Value::Real(*v),
            Self::Timestamp(ts) => libsql::Value::Text(ts.to_rfc3339()),
        })
    }

    fn as_text(&self, field: ItemField) -> Result<String> {
        match self {
            Self::Text(s) => Ok(s.clone()),
            other => Err(mismatch(field, other)),
        }
    }
}

/// How one field is written.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    /// Replace whatever is stored.
    Overwrite(FieldValue),
    /// Write only when the stored field is absent (NULL).
    SetIfAbsent(FieldValue),
    /// Set the field to absent.
    Clear,
}

/// A set of field writes applied atomically to one item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemWrite {
    fields: Vec<(ItemField, FieldWrite)>,
}

impl ItemWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overwrite(self, field: ItemField, value: impl Into<FieldValue>) -> Self {
        self.with(field, FieldWrite::Overwrite(value.into()))
    }

    pub fn set_if_absent(self, field: ItemField, value: impl Into<FieldValue>) -> Self {
        self.with(field, FieldWrite::SetIfAbsent(value.into()))
    }

    pub fn clear(self, field: ItemField) -> Self {
        self.with(field, FieldWrite::Clear)
    }

    /// Add or replace the write for `field`.
    pub fn with(mut self, field: ItemField, write: FieldWrite) -> Self {
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = write,
            None => self.fields.push((field, write)),
        }
        self
    }

    pub fn fields(&self) -> &[(ItemField, FieldWrite)] {
        &self.fields
    }

    pub fn get(&self, field: ItemField) -> Option<&FieldWrite> {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, write)| write)
    }

    pub fn touches(&self, field: ItemField) -> bool {
        self.get(field).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Apply this write to an in-memory item with the same semantics as the
    /// SQL backend.
    pub fn apply_to(&self, item: &mut Item) -> Result<()> {
        for (field, write) in &self.fields {
            match write {
                FieldWrite::Overwrite(value) => set_field(item, *field, Some(value))?,
                FieldWrite::SetIfAbsent(value) => {
                    if field_is_absent(item, *field) {
                        set_field(item, *field, Some(value))?;
                    }
                }
                FieldWrite::Clear => set_field(item, *field, None)?,
            }
        }
        Ok(())
    }

    /// Build a new item from an insert-style write. Required columns must be
    /// present, mirroring the `NOT NULL` constraints of the table.
    pub fn build_item(&self, id: &ItemId) -> Result<Item> {
        let required = |field: ItemField| -> Result<&FieldValue> {
            match self.get(field) {
                Some(FieldWrite::Overwrite(v)) | Some(FieldWrite::SetIfAbsent(v)) => Ok(v),
                _ => Err(EucHubError::Storage(format!(
                    "NOT NULL constraint failed: items.{}",
                    field.column()
                ))),
            }
        };

        let source: SourceKind = required(ItemField::Source)?
            .as_text(ItemField::Source)?
            .parse()?;
        let last_ingested_at = match required(ItemField::LastIngestedAt)? {
            FieldValue::Timestamp(ts) => *ts,
            other => return Err(mismatch(ItemField::LastIngestedAt, other)),
        };

        let mut item = Item {
            id: id.clone(),
            source,
            source_url: required(ItemField::SourceUrl)?.as_text(ItemField::SourceUrl)?,
            title: required(ItemField::Title)?.as_text(ItemField::Title)?,
            tag_list: Vec::new(),
            published_at: None,
            updated_at: None,
            author_display: None,
            body_text: None,
            ai_summary: None,
            content_label: None,
            label_confidence: None,
            last_ingested_at,
        };
        self.apply_to(&mut item)?;
        Ok(item)
    }
}

fn mismatch(field: ItemField, value: &FieldValue) -> EucHubError {
    EucHubError::Storage(format!(
        "value {value:?} does not fit column {}",
        field.column()
    ))
}

fn field_is_absent(item: &Item, field: ItemField) -> bool {
    match field {
        ItemField::PublishedAt => item.published_at.is_none(),
        ItemField::UpdatedAt => item.updated_at.is_none(),
        ItemField::AuthorDisplay => item.author_display.is_none(),
        ItemField::BodyText => item.body_text.is_none(),
        ItemField::AiSummary => item.ai_summary.is_none(),
        ItemField::ContentLabel => item.content_label.is_none(),
        ItemField::LabelConfidence => item.label_confidence.is_none(),
        // NOT NULL columns are never absent.
        ItemField::Source
        | ItemField::SourceUrl
        | ItemField::Title
        | ItemField::TagList
        | ItemField::LastIngestedAt => false,
    }
}

fn set_field(item: &mut Item, field: ItemField, value: Option<&FieldValue>) -> Result<()> {
    let text = |v: Option<&FieldValue>| v.map(|v| v.as_text(field)).transpose();

    match field {
        ItemField::PublishedAt => item.published_at = text(value)?,
        ItemField::UpdatedAt => item.updated_at = text(value)?,
        ItemField::AuthorDisplay => item.author_display = text(value)?,
        ItemField::BodyText => item.body_text = text(value)?,
        ItemField::AiSummary => item.ai_summary = text(value)?,
        ItemField::ContentLabel => {
            item.content_label = match text(value)? {
                Some(s) => Some(ContentLabel::parse(&s).ok_or_else(|| {
                    EucHubError::Storage(format!("unknown content label '{s}'"))
                })?),
                None => None,
            }
        }
        ItemField::LabelConfidence => {
            item.label_confidence = match value {
                Some(FieldValue::Real(v)) => Some(*v as f32),
                Some(other) => return Err(mismatch(field, other)),
                None => None,
            }
        }
        ItemField::Title => {
            item.title = text(value)?.ok_or_else(|| not_null(field))?;
        }
        ItemField::SourceUrl => {
            item.source_url = text(value)?.ok_or_else(|| not_null(field))?;
        }
        ItemField::Source => {
            item.source = text(value)?.ok_or_else(|| not_null(field))?.parse()?;
        }
        ItemField::TagList => match value {
            Some(FieldValue::Tags(tags)) => item.tag_list = tags.clone(),
            Some(other) => return Err(mismatch(field, other)),
            None => return Err(not_null(field)),
        },
        ItemField::LastIngestedAt => match value {
            Some(FieldValue::Timestamp(ts)) => item.last_ingested_at = *ts,
            Some(other) => return Err(mismatch(field, other)),
            None => return Err(not_null(field)),
        },
    }
    Ok(())
}

fn not_null(field: ItemField) -> EucHubError {
    EucHubError::Storage(format!("NOT NULL constraint failed: items.{}", field.column()))
}

/// Optimistic-concurrency condition attached to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteGuard {
    /// Apply to an existing item unconditionally.
    Exists,
    /// Create the item; conflict if it already exists.
    Absent,
    /// Apply only if the stored change signal still equals this value.
    UpdatedAt(Option<String>),
}

/// Result of a guarded write.
///
/// The libSQL backend tells `Conflict` from `Missing` with a second query
/// after the guarded `UPDATE` matched nothing, so the distinction is advisory:
/// callers must handle both the same way (re-read, or drop the write).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The guard did not hold; the caller should re-read and retry.
    Conflict,
    /// No item with that id existed when the outcome was checked.
    Missing,
}
