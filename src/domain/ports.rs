//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the abstractions the tracking engine depends on.
//! Infrastructure adapters implement these traits to provide concrete
//! implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │ StatsSource │ ConfigStore │ HistoryStore │ Listener │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │ RestStatsSource │ SqliteStateStore │ LoggingListener │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::{MetricChange, VersionsChange};
use crate::error::Result;

/// A configuration document as fetched: top-level key to raw JSON section.
pub type ConfigDocument = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Value Objects
// =============================================================================

/// A product release eligible for polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedVersion {
    /// Release number, e.g. 53
    pub number: i64,
    /// Human title, e.g. "Beta"
    pub title: String,
    /// Label the release is published under in the configuration document
    pub label: String,
}

/// A named remote lookup parameterised by release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedQuery {
    pub id: String,
    pub title: String,
    /// URL fragment with `{RELEASE}` and `{OLDERRELEASE}` placeholders
    pub url_template: String,
}

impl TrackedQuery {
    /// Substitute the release placeholders for `version`.
    pub fn render(&self, version: i64) -> String {
        self.url_template
            .replace("{RELEASE}", &version.to_string())
            .replace("{OLDERRELEASE}", &(version - 1).to_string())
    }
}

/// Identity of one (version, query) history.
///
/// Rendered as `"{version}:{query_id}"` so it survives restarts unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey(String);

impl MetricKey {
    pub fn new(version: i64, query_id: &str) -> Self {
        Self(format!("{}:{}", version, query_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One recorded sample of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub value: i64,
    pub observed_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(value: i64, observed_at: DateTime<Utc>) -> Self {
        Self { value, observed_at }
    }

    /// Observation stamped with the current time.
    pub fn now(value: i64) -> Self {
        Self::new(value, Utc::now())
    }
}

// =============================================================================
// Remote Source Port
// =============================================================================

/// Port for the remote data source: the configuration document and the
/// per-query counts.
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Fetch the configuration document.
    async fn fetch_config_document(&self) -> Result<ConfigDocument>;

    /// Fetch the count behind a fully rendered query URL.
    async fn fetch_count(&self, url: &str) -> Result<i64>;
}

// =============================================================================
// Persistence Ports
// =============================================================================

/// Port for the persisted configuration, one entry per top-level key.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// All persisted entries.
    async fn entries(&self) -> Result<ConfigDocument>;

    /// A single persisted entry.
    async fn entry(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Whether any configuration has ever been persisted.
    async fn has_entries(&self) -> Result<bool>;

    /// Replace the whole persisted document in one step. Readers see either
    /// the old or the new set of entries, never a mix.
    async fn replace_entries(&self, document: &ConfigDocument) -> Result<()>;
}

/// Port for the per-metric observation history.
///
/// Each key owns a list kept newest first. Appends only ever go to the head.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Most recent observation, `None` if the key was never observed.
    async fn latest(&self, key: &MetricKey) -> Result<Option<Observation>>;

    /// Push an observation to the head of the key's history.
    async fn append(&self, key: &MetricKey, observation: Observation) -> Result<()>;

    /// Up to `limit` observations, newest first.
    async fn history(&self, key: &MetricKey, limit: usize) -> Result<Vec<Observation>>;
}

// =============================================================================
// Notification Port
// =============================================================================

/// Port for change subscribers.
///
/// Delivery is best effort: a failing listener is logged and the engine moves
/// on.
#[async_trait]
pub trait StatsListener: Send + Sync {
    /// A metric value differs from its last recorded value.
    async fn on_metric_changed(&self, change: &MetricChange) -> Result<()>;

    /// The tracked version set differs from the last persisted one.
    async fn on_versions_changed(&self, change: &VersionsChange) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_key_format() {
        let key = MetricKey::new(53, "known");
        assert_eq!(key.as_str(), "53:known");
        assert_eq!(key.to_string(), "53:known");
        assert_eq!(key, MetricKey::new(53, "known"));
    }

    #[test]
    fn test_query_render_placeholders() {
        let query = TrackedQuery {
            id: "known".into(),
            title: "Known Issues".into(),
            url_template: "bug?f1=cf_status_firefox{RELEASE}&f2=cf_status_firefox{OLDERRELEASE}"
                .into(),
        };

        assert_eq!(
            query.render(53),
            "bug?f1=cf_status_firefox53&f2=cf_status_firefox52"
        );
    }

    #[test]
    fn test_query_render_without_placeholders() {
        let query = TrackedQuery {
            id: "all".into(),
            title: "All".into(),
            url_template: "bug?product=Core".into(),
        };
        assert_eq!(query.render(10), "bug?product=Core");
    }

    #[test]
    fn test_observation_serializes() {
        let obs = Observation::now(42);
        let json = serde_json::to_string(&obs).unwrap();
        let back: Observation = serde_json::from_str(&json).unwrap();

        assert!(json.contains("\"value\":42"));
        assert_eq!(back, obs);
    }
}
