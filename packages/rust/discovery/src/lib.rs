//! Discovery of what to ingest: sitemap and blog-listing parsing.
//!
//! Nothing here performs I/O. The fetchers in `euchub-crawler` download the
//! documents and hand them to these parsers:
//! - [`sitemap`] for the slow source's sitemap index and article sitemaps
//! - [`listing`] for the fast source's paginated blog listing
//! - [`slug`] for title derivation and relevance filtering of sitemap-only entries

pub mod listing;
pub mod sitemap;
pub mod slug;

pub use listing::{ListingPage, is_post_url, parse_listing};
pub use sitemap::{SitemapDocument, SitemapEntry, parse_sitemap};
pub use slug::{is_relevant, title_from_slug};
