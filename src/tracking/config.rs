//! Tracking Configuration
//!
//! Parsed view of the remote configuration document: which releases to
//! track, which queries to run against them, and where the count API lives.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::domain::{ConfigDocument, MetricKey, TrackedQuery, TrackedVersion};

/// Document key holding the tracked releases.
pub const VERSIONS_KEY: &str = "versions";

/// Document key holding the query list.
pub const QUERIES_KEY: &str = "bugQueries";

/// Document key holding the count API base URL.
pub const BASE_URL_KEY: &str = "BUGZILLA_REST_URL";

/// Appended to every rendered query so the API returns a count only.
pub const COUNT_ONLY_SUFFIX: &str = "&count_only=1";

// =============================================================================
// Document Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct VersionEntry {
    version: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct QueryEntry {
    id: String,
    title: String,
    url: String,
}

/// Parse a `versions` section (label → `{version, title}`), ordered by release
/// number. Malformed entries are skipped.
pub fn parse_versions(value: &Value) -> Vec<TrackedVersion> {
    let Some(entries) = value.as_object() else {
        warn!("'{}' section is not an object, ignoring it", VERSIONS_KEY);
        return Vec::new();
    };

    let mut versions: BTreeMap<i64, TrackedVersion> = BTreeMap::new();
    for (label, raw) in entries {
        match VersionEntry::deserialize(raw) {
            Ok(entry) => {
                let tracked = TrackedVersion {
                    number: entry.version,
                    title: entry.title,
                    label: label.clone(),
                };
                if let Some(previous) = versions.insert(tracked.number, tracked) {
                    warn!(
                        "Release {} listed twice, '{}' replaced by '{}'",
                        previous.number, previous.label, label
                    );
                }
            }
            Err(e) => warn!("Skipping malformed version entry '{}': {}", label, e),
        }
    }

    versions.into_values().collect()
}

fn parse_queries(value: &Value) -> Vec<TrackedQuery> {
    let Some(entries) = value.as_array() else {
        warn!("'{}' section is not a list, ignoring it", QUERIES_KEY);
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|raw| match QueryEntry::deserialize(raw) {
            Ok(entry) => Some(TrackedQuery {
                id: entry.id,
                title: entry.title,
                url_template: entry.url,
            }),
            Err(e) => {
                warn!("Skipping malformed query entry: {}", e);
                None
            }
        })
        .collect()
}

// =============================================================================
// Tracking Config
// =============================================================================

/// Tracked releases and queries, with their title tables.
///
/// Built once from a persisted document and never mutated; a refresh produces
/// a new instance.
#[derive(Debug, Clone, Default)]
pub struct TrackingConfig {
    versions: BTreeMap<i64, TrackedVersion>,
    queries: Vec<TrackedQuery>,
    remote_base_url: String,
    version_titles: BTreeMap<i64, String>,
    query_titles: BTreeMap<String, String>,
}

impl TrackingConfig {
    /// Build from a configuration document. Missing sections leave the
    /// corresponding part empty.
    pub fn from_document(document: &ConfigDocument) -> Self {
        let versions = document
            .get(VERSIONS_KEY)
            .map(parse_versions)
            .unwrap_or_default();
        let queries = document
            .get(QUERIES_KEY)
            .map(parse_queries)
            .unwrap_or_default();
        let remote_base_url = document
            .get(BASE_URL_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if versions.is_empty() || queries.is_empty() {
            warn!(
                "Configuration tracks {} versions and {} queries, nothing will be polled",
                versions.len(),
                queries.len()
            );
        }

        Self::new(versions, queries, remote_base_url)
    }

    pub fn new(
        versions: Vec<TrackedVersion>,
        queries: Vec<TrackedQuery>,
        remote_base_url: impl Into<String>,
    ) -> Self {
        let versions: BTreeMap<i64, TrackedVersion> =
            versions.into_iter().map(|v| (v.number, v)).collect();
        let version_titles = versions
            .values()
            .map(|v| (v.number, v.title.clone()))
            .collect();
        let query_titles = queries
            .iter()
            .map(|q| (q.id.clone(), q.title.clone()))
            .collect();

        Self {
            versions,
            queries,
            remote_base_url: remote_base_url.into(),
            version_titles,
            query_titles,
        }
    }

    /// Tracked releases, ordered by number.
    pub fn versions(&self) -> impl Iterator<Item = &TrackedVersion> {
        self.versions.values()
    }

    pub fn version(&self, number: i64) -> Option<&TrackedVersion> {
        self.versions.get(&number)
    }

    /// Tracked queries in document order.
    pub fn queries(&self) -> &[TrackedQuery] {
        &self.queries
    }

    pub fn remote_base_url(&self) -> &str {
        &self.remote_base_url
    }

    /// Release number → title.
    pub fn version_titles(&self) -> &BTreeMap<i64, String> {
        &self.version_titles
    }

    /// Query id → title.
    pub fn query_titles(&self) -> &BTreeMap<String, String> {
        &self.query_titles
    }

    /// Every (version, query) pair, versions outermost.
    pub fn pairs(&self) -> impl Iterator<Item = (&TrackedVersion, &TrackedQuery)> {
        self.versions
            .values()
            .flat_map(move |v| self.queries.iter().map(move |q| (v, q)))
    }

    pub fn pair_count(&self) -> usize {
        self.versions.len() * self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pair_count() == 0
    }

    /// Full count URL for a pair.
    pub fn count_url(&self, version: &TrackedVersion, query: &TrackedQuery) -> String {
        format!(
            "{}{}{}",
            self.remote_base_url,
            query.render(version.number),
            COUNT_ONLY_SUFFIX
        )
    }

    pub fn metric_key(version: &TrackedVersion, query: &TrackedQuery) -> MetricKey {
        MetricKey::new(version.number, &query.id)
    }
}
