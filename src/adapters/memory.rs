//! In-Memory State Store
//!
//! Implements `ConfigStore` and `HistoryStore` without persistence. Used by
//! tests and by `--in-memory` runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::domain::{ConfigDocument, ConfigStore, HistoryStore, MetricKey, Observation};
use crate::error::Result;

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Distinct metric keys with history
    pub metric_count: u64,
    /// Observations appended since creation
    pub appends: u64,
    /// Configuration replacements since creation
    pub config_writes: u64,
}

/// In-memory store
/// Uses DashMap so appends for different keys never contend on one lock
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    config: RwLock<ConfigDocument>,
    history: DashMap<MetricKey, VecDeque<Observation>>,
    appends: AtomicU64,
    config_writes: AtomicU64,
}

impl InMemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            metric_count: self.history.len() as u64,
            appends: self.appends.load(Ordering::Relaxed),
            config_writes: self.config_writes.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl ConfigStore for InMemoryStateStore {
    async fn entries(&self) -> Result<ConfigDocument> {
        Ok(self.config.read().clone())
    }

    async fn entry(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.config.read().get(key).cloned())
    }

    async fn has_entries(&self) -> Result<bool> {
        Ok(!self.config.read().is_empty())
    }

    async fn replace_entries(&self, document: &ConfigDocument) -> Result<()> {
        *self.config.write() = document.clone();
        self.config_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for InMemoryStateStore {
    async fn latest(&self, key: &MetricKey) -> Result<Option<Observation>> {
        Ok(self
            .history
            .get(key)
            .and_then(|entries| entries.front().copied()))
    }

    async fn append(&self, key: &MetricKey, observation: Observation) -> Result<()> {
        self.history
            .entry(key.clone())
            .or_default()
            .push_front(observation);
        self.appends.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn history(&self, key: &MetricKey, limit: usize) -> Result<Vec<Observation>> {
        Ok(self
            .history
            .get(key)
            .map(|entries| entries.iter().take(limit).copied().collect())
            .unwrap_or_default())
    }
}
