//! Tracking configuration
//!
//! Which releases and queries are polled, fetched from a remote document and
//! cached in memory.

mod cache;
mod config;

pub use cache::ConfigCache;
pub use config::{
    parse_versions, TrackingConfig, BASE_URL_KEY, COUNT_ONLY_SUFFIX, QUERIES_KEY, VERSIONS_KEY,
};
