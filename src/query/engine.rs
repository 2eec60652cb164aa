//! Query Engine
//!
//! Answers "latest value for these versions and queries" from the cached
//! configuration and the history store. Lookups never poll and never refresh.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::selector::{QuerySelector, VersionSelector};
use crate::domain::HistoryStore;
use crate::error::Result;
use crate::tracking::{ConfigCache, TrackingConfig};

/// Release number → query id → latest value.
pub type StatsTable = BTreeMap<i64, BTreeMap<String, i64>>;

/// Read-only lookups over recorded stats
pub struct QueryEngine {
    cache: Arc<ConfigCache>,
    history: Arc<dyn HistoryStore>,
}

impl QueryEngine {
    pub fn new(cache: Arc<ConfigCache>, history: Arc<dyn HistoryStore>) -> Self {
        Self { cache, history }
    }

    /// Latest recorded value for every selected pair. Pairs without history
    /// are left out.
    #[instrument(skip(self))]
    pub async fn query(
        &self,
        versions: &VersionSelector,
        queries: &QuerySelector,
    ) -> Result<StatsTable> {
        let Some(config) = self.cache.current().await? else {
            debug!("No tracking configuration stored yet");
            return Ok(StatsTable::new());
        };

        self.query_config(&config, versions, queries).await
    }

    async fn query_config(
        &self,
        config: &TrackingConfig,
        versions: &VersionSelector,
        queries: &QuerySelector,
    ) -> Result<StatsTable> {
        let mut table = StatsTable::new();

        for version in versions.resolve(config) {
            for query in queries.resolve(config) {
                let key = TrackingConfig::metric_key(version, query);
                if let Some(latest) = self.history.latest(&key).await? {
                    table
                        .entry(version.number)
                        .or_default()
                        .insert(query.id.clone(), latest.value);
                }
            }
        }

        Ok(table)
    }

    /// One line per selected pair, `"{title} ({number}) {query}: {value}"`,
    /// sorted. Empty when nothing matched.
    pub async fn lines(
        &self,
        versions: &VersionSelector,
        queries: &QuerySelector,
    ) -> Result<Vec<String>> {
        let Some(config) = self.cache.current().await? else {
            return Ok(Vec::new());
        };

        let table = self.query_config(&config, versions, queries).await?;
        let mut lines: Vec<String> = table
            .iter()
            .flat_map(|(number, values)| {
                let config = &config;
                values.iter().map(move |(query_id, value)| {
                    format!(
                        "{} ({}) {}: {}",
                        config
                            .version_titles()
                            .get(number)
                            .map(String::as_str)
                            .unwrap_or("?"),
                        number,
                        config
                            .query_titles()
                            .get(query_id)
                            .map(String::as_str)
                            .unwrap_or(query_id),
                        value
                    )
                })
            })
            .collect();
        lines.sort();

        Ok(lines)
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("cache", &self.cache)
            .finish()
    }
}
