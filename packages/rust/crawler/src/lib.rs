//! HTTP fetching, post extraction, and the source fetchers.
//!
//! This crate provides:
//! - [`engine`] for the rate-limited, retrying [`HttpFetcher`]
//! - [`adapters`] for platform-specific post extraction (AWS blog, Builder)
//! - [`fetchers`] for the fast/slow metadata fetchers and the full-content fetcher

pub mod adapters;
pub mod engine;
pub mod fetchers;

pub use adapters::{
    AdapterRegistry, BlogAdapter, BuilderAdapter, ExtractedPost, GenericAdapter, PostAdapter,
    truncate_chars,
};
pub use engine::HttpFetcher;
pub use fetchers::{
    ContentFetcher, FastSourceFetcher, FetchFailure, FullContentFetcher, IndexFetch,
    MetadataFetcher, PageContent, SlowSourceFetcher,
};
