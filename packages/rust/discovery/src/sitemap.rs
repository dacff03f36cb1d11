//! Sitemap parsing for the slow source.
//!
//! The slow source publishes a sitemap "index" that is actually a `<urlset>`
//! whose `<loc>` entries point at per-month article sitemaps. A conventional
//! `<sitemapindex>` is accepted as well.

use euchub_shared::{EucHubError, Result};
use quick_xml::de::from_str;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct UrlSet {
    #[serde(rename = "url", default)]
    urls: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct SitemapIndex {
    #[serde(rename = "sitemap", default)]
    sitemaps: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    loc: Option<String>,
    lastmod: Option<String>,
}

/// One `<url>` or `<sitemap>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<String>,
}

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    UrlSet(Vec<SitemapEntry>),
    Index(Vec<SitemapEntry>),
}

impl SitemapDocument {
    pub fn entries(&self) -> &[SitemapEntry] {
        match self {
            Self::UrlSet(entries) | Self::Index(entries) => entries,
        }
    }

    /// Child sitemap URLs whose location contains `marker`.
    pub fn article_sitemaps(&self, marker: &str) -> Vec<String> {
        self.entries()
            .iter()
            .filter(|e| e.loc.contains(marker))
            .map(|e| e.loc.clone())
            .collect()
    }

    /// Entries that carry both a location and a last-modified date.
    pub fn dated_entries(&self) -> Vec<(String, String)> {
        self.entries()
            .iter()
            .filter_map(|e| {
                let lastmod = e.lastmod.as_deref()?.trim();
                (!lastmod.is_empty()).then(|| (e.loc.clone(), lastmod.to_string()))
            })
            .collect()
    }
}

/// Parse a sitemap XML document.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDocument> {
    let is_index = xml.contains("<sitemapindex");

    let raw = if is_index {
        from_str::<SitemapIndex>(xml).map(|doc| doc.sitemaps)
    } else {
        from_str::<UrlSet>(xml).map(|doc| doc.urls)
    }
    .map_err(|e| EucHubError::parse(format!("invalid sitemap: {e}")))?;

    let entries: Vec<SitemapEntry> = raw
        .into_iter()
        .filter_map(|e| {
            let loc = e.loc?.trim().to_string();
            (!loc.is_empty()).then_some(SitemapEntry {
                loc,
                lastmod: e.lastmod,
            })
        })
        .collect();

    tracing::debug!(entries = entries.len(), is_index, "parsed sitemap");

    Ok(if is_index {
        SitemapDocument::Index(entries)
    } else {
        SitemapDocument::UrlSet(entries)
    })
}
