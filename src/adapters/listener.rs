//! Stats Listener Adapters
//!
//! Implements the `StatsListener` port with various backends.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::{MetricChange, StatsEvent, StatsListener, VersionsChange};
use crate::error::Result;

/// Logging-based listener.
///
/// Renders every change as its human message on the tracing output.
#[derive(Debug, Clone, Default)]
pub struct LoggingStatsListener {
    /// Whether to log events at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingStatsListener {
    /// Create a new logging listener (debug level).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a listener that logs at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    fn log(&self, event: StatsEvent) {
        let event_type = event.event_type();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        if self.info_level {
            info!(event_type = %event_type, event = %json, "{}", event);
        } else {
            debug!(event_type = %event_type, event = %json, "{}", event);
        }
    }
}

#[async_trait]
impl StatsListener for LoggingStatsListener {
    async fn on_metric_changed(&self, change: &MetricChange) -> Result<()> {
        self.log(StatsEvent::MetricChanged(change.clone()));
        Ok(())
    }

    async fn on_versions_changed(&self, change: &VersionsChange) -> Result<()> {
        self.log(StatsEvent::VersionsChanged(change.clone()));
        Ok(())
    }
}

/// In-memory event collector for testing.
///
/// Collects events in memory for later inspection during tests.
#[derive(Debug, Default)]
pub struct InMemoryStatsCollector {
    events: parking_lot::RwLock<Vec<StatsEvent>>,
}

impl InMemoryStatsCollector {
    /// Create a new in-memory collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<StatsEvent> {
        self.events.read().clone()
    }

    /// Get the collected metric changes, in delivery order.
    pub fn metric_changes(&self) -> Vec<MetricChange> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                StatsEvent::MetricChanged(c) => Some(c.clone()),
                StatsEvent::VersionsChanged(_) => None,
            })
            .collect()
    }

    /// Get the count of collected events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if there are no events.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get events of a specific type.
    pub fn events_of_type(&self, event_type: &str) -> Vec<StatsEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StatsListener for InMemoryStatsCollector {
    async fn on_metric_changed(&self, change: &MetricChange) -> Result<()> {
        self.events
            .write()
            .push(StatsEvent::MetricChanged(change.clone()));
        Ok(())
    }

    async fn on_versions_changed(&self, change: &VersionsChange) -> Result<()> {
        self.events
            .write()
            .push(StatsEvent::VersionsChanged(change.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn change(current: i64) -> MetricChange {
        MetricChange {
            version_number: 52,
            version_title: "Release".into(),
            query_title: "New".into(),
            previous: None,
            current,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_logging_listener() {
        let listener = LoggingStatsListener::info_level();
        assert!(listener.on_metric_changed(&change(1)).await.is_ok());

        let quiet = LoggingStatsListener::new();
        let versions = VersionsChange {
            old: vec![],
            new: vec![],
        };
        assert!(quiet.on_versions_changed(&versions).await.is_ok());
    }

    #[tokio::test]
    async fn test_collector_records_in_order() {
        let collector = InMemoryStatsCollector::new();
        assert!(collector.is_empty());

        collector.on_metric_changed(&change(1)).await.unwrap();
        collector.on_metric_changed(&change(2)).await.unwrap();
        collector
            .on_versions_changed(&VersionsChange {
                old: vec![],
                new: vec![],
            })
            .await
            .unwrap();

        assert_eq!(collector.len(), 3);
        let values: Vec<i64> = collector.metric_changes().iter().map(|c| c.current).collect();
        assert_eq!(values, vec![1, 2]);
        assert_eq!(collector.events_of_type("VersionsChanged").len(), 1);

        collector.clear();
        assert!(collector.is_empty());
    }
}
