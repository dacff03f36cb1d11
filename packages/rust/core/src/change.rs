//! Change detection and the per-classification write policy.
//!
//! Only the source's change signal (`updated_at`) is compared. Content and
//! derived fields never take part in the decision.

use chrono::{DateTime, Utc};

use euchub_shared::{FetchedItem, Item};
use euchub_storage::{ItemField, ItemWrite, WriteGuard};

/// How a fetched item relates to what the store already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    New,
    Changed,
    Unchanged,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
        }
    }

    /// Whether the item is enrolled into enrichment after its write.
    pub fn enrolls(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Classify `fetched` against the stored record.
///
/// A stored item without `updated_at` is a legacy record and counts as
/// CHANGED, so it converges after one pass.
pub fn detect(fetched: &FetchedItem, stored: Option<&Item>) -> ChangeKind {
    match stored {
        None => ChangeKind::New,
        Some(item) => match item.updated_at.as_deref() {
            Some(updated_at) if updated_at == fetched.updated_at => ChangeKind::Unchanged,
            _ => ChangeKind::Changed,
        },
    }
}

/// Field writes for one ingestion of `fetched`.
///
/// Title, tags and both dates are refreshed on every pass. NEW/CHANGED also
/// overwrite author and body and clear the derived fields. UNCHANGED fills
/// author/body only where the store has nothing and leaves derived fields out
/// of the write entirely.
pub fn write_policy(kind: ChangeKind, fetched: &FetchedItem, now: DateTime<Utc>) -> ItemWrite {
    let write = ItemWrite::new()
        .overwrite(ItemField::Source, fetched.source)
        .overwrite(ItemField::SourceUrl, fetched.source_url.as_str())
        .overwrite(ItemField::Title, fetched.title.as_str())
        .overwrite(ItemField::TagList, fetched.tag_list.clone())
        .overwrite(ItemField::PublishedAt, fetched.published_at.as_str())
        .overwrite(ItemField::UpdatedAt, fetched.updated_at.as_str())
        .overwrite(ItemField::LastIngestedAt, now);

    match kind {
        ChangeKind::New | ChangeKind::Changed => {
            let write = write.overwrite(ItemField::AuthorDisplay, fetched.author_display.as_str());
            let write = match fetched_body(fetched) {
                Some(body) => write.overwrite(ItemField::BodyText, body),
                None => write.clear(ItemField::BodyText),
            };
            ItemField::DERIVED.into_iter().fold(write, ItemWrite::clear)
        }
        ChangeKind::Unchanged => {
            let write = write.set_if_absent(ItemField::AuthorDisplay, fetched.author_display.as_str());
            match fetched_body(fetched) {
                Some(body) => write.set_if_absent(ItemField::BodyText, body),
                None => write,
            }
        }
    }
}

/// An empty fetched body is stored as absent so a later pass can still fill it.
fn fetched_body(fetched: &FetchedItem) -> Option<&str> {
    Some(fetched.body_text.as_str()).filter(|body| !body.trim().is_empty())
}

/// Guard that makes the write conditional on what the detector observed.
pub fn guard_for(kind: ChangeKind, stored: Option<&Item>) -> WriteGuard {
    match kind {
        ChangeKind::New => WriteGuard::Absent,
        ChangeKind::Changed | ChangeKind::Unchanged => {
            WriteGuard::UpdatedAt(stored.and_then(|item| item.updated_at.clone()))
        }
    }
}
