//! Stats Poller - "The Eyes"
//!
//! Walks every tracked (version, query) pair, fetches its current count and
//! compares it with the newest recorded observation. Changes are appended to
//! the history and announced to the listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    HistoryStore, MetricChange, Observation, StatsListener, StatsSource, TrackedQuery,
    TrackedVersion,
};
use crate::error::Result;
use crate::telemetry::EngineMetrics;
use crate::tracking::{ConfigCache, TrackingConfig};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stats poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval between poll cycles
    pub poll_interval: Duration,

    /// Minimum age of the tracking configuration before it is fetched again
    pub config_refresh_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5 * 60),
            config_refresh_interval: Duration::from_secs(10 * 60),
        }
    }
}

// =============================================================================
// Poll Summary
// =============================================================================

/// Outcome of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Pairs in the configuration
    pub pairs: usize,

    /// Pairs whose count was fetched and compared
    pub fetched: usize,

    /// Pairs skipped because a fetch or store operation failed
    pub failed: usize,

    /// Pairs that produced a new observation
    pub changed: usize,
}

// =============================================================================
// Stats Poller
// =============================================================================

/// Background poller driving configuration refreshes and poll cycles
pub struct StatsPoller {
    config: PollerConfig,
    cache: Arc<ConfigCache>,
    source: Arc<dyn StatsSource>,
    history: Arc<dyn HistoryStore>,
    listener: Arc<dyn StatsListener>,
    metrics: Option<Arc<EngineMetrics>>,

    /// When the configuration was last refreshed successfully
    last_config_refresh: Mutex<Option<Instant>>,

    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

impl StatsPoller {
    /// Create a new poller
    pub fn new(
        config: PollerConfig,
        cache: Arc<ConfigCache>,
        source: Arc<dyn StatsSource>,
        history: Arc<dyn HistoryStore>,
        listener: Arc<dyn StatsListener>,
    ) -> Self {
        Self {
            config,
            cache,
            source,
            history,
            listener,
            metrics: None,
            last_config_refresh: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        }
    }

    /// Record activity on `metrics`
    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the poller background loop until [`shutdown`](Self::shutdown)
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) {
        info!("Starting stats poller with {:?}", self.config);

        let mut config_tick = interval(self.config.config_refresh_interval);
        let mut poll_tick = interval(self.config.poll_interval);
        config_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Register for the wakeup before reading the flag so a shutdown
            // between the two is not lost.
            let notified = self.shutdown_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                biased;

                _ = &mut notified => {
                    break;
                }

                _ = config_tick.tick() => {
                    self.maybe_refresh_config().await;
                }

                _ = poll_tick.tick() => {
                    self.maybe_refresh_config().await;
                    if let Err(e) = self.poll_once().await {
                        warn!("Poll cycle skipped: {}", e);
                    }
                }
            }
        }

        info!("Stats poller shutting down");
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    /// Refresh the tracking configuration if it was never refreshed or is
    /// older than the refresh interval. Returns whether a refresh succeeded.
    ///
    /// A failed refresh leaves the timestamp alone so the next tick retries.
    pub async fn maybe_refresh_config(&self) -> bool {
        let due = match *self.last_config_refresh.lock() {
            None => true,
            Some(at) => at.elapsed() >= self.config.config_refresh_interval,
        };
        if !due {
            return false;
        }

        info!("Refreshing tracking configuration");
        match self.cache.refresh().await {
            Ok(()) => {
                *self.last_config_refresh.lock() = Some(Instant::now());
                self.record_refresh("success");
                info!("Tracking configuration refresh complete");
                true
            }
            Err(e) => {
                self.record_refresh("failure");
                warn!("Configuration refresh failed, will retry: {}", e);
                false
            }
        }
    }

    /// Run one full poll cycle over the current configuration
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let config = self.cache.get().await?;

        let mut summary = PollSummary {
            pairs: config.pair_count(),
            ..Default::default()
        };
        if let Some(metrics) = &self.metrics {
            metrics.tracked_pairs.set(summary.pairs as i64);
        }

        for (version, query) in config.pairs() {
            match self.poll_pair(&config, version, query).await {
                Ok(change) => {
                    summary.fetched += 1;
                    if change.is_some() {
                        summary.changed += 1;
                    }
                }
                Err(e) if e.is_fetch() => {
                    summary.failed += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.fetch_failures.with_label_values(&[e.kind()]).inc();
                    }
                    error!(
                        "Error polling {} {} {}: {}",
                        version.title, version.number, query.title, e
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        "Error recording {} {} {}: {}",
                        version.title, version.number, query.title, e
                    );
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.poll_cycles.inc();
        }
        debug!(
            "Poll cycle done: {} pairs, {} fetched, {} failed, {} changed",
            summary.pairs, summary.fetched, summary.failed, summary.changed
        );

        Ok(summary)
    }

    /// Fetch one pair and record it if it changed
    async fn poll_pair(
        &self,
        config: &TrackingConfig,
        version: &TrackedVersion,
        query: &TrackedQuery,
    ) -> Result<Option<MetricChange>> {
        debug!(
            "Polling: {} {} {}",
            version.title, version.number, query.title
        );

        let url = config.count_url(version, query);
        let current = self.source.fetch_count(&url).await?;
        if let Some(metrics) = &self.metrics {
            metrics.pairs_polled.inc();
        }

        let key = TrackingConfig::metric_key(version, query);
        let previous = self.history.latest(&key).await?.map(|o| o.value);
        debug!("Results: {:?} -> {}", previous, current);

        if previous == Some(current) {
            return Ok(None);
        }

        info!("{} has changed from {:?} to {}", key, previous, current);
        let observation = Observation::now(current);
        self.history.append(&key, observation).await?;

        let change = MetricChange {
            version_number: version.number,
            version_title: version.title.clone(),
            query_title: query.title.clone(),
            previous,
            current,
            observed_at: observation.observed_at,
        };
        if let Some(metrics) = &self.metrics {
            let direction = change.kind().to_string();
            metrics
                .metric_changes
                .with_label_values(&[direction.as_str()])
                .inc();
        }

        if let Err(e) = self.listener.on_metric_changed(&change).await {
            warn!("Listener failed for {}: {}", key, e);
        }

        Ok(Some(change))
    }

    fn record_refresh(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.config_refreshes.with_label_values(&[outcome]).inc();
        }
    }
}

impl std::fmt::Debug for StatsPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsPoller")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryStateStore, InMemoryStatsCollector, StaticStatsSource};
    use crate::domain::{ChangeKind, MetricKey};
    use crate::error::Error;
    use serde_json::json;

    const BASE: &str = "https://bugzilla.example.org/rest/";

    fn url(version: i64) -> String {
        format!("{}bug?f1=cf_status_firefox{}&count_only=1", BASE, version)
    }

    struct Harness {
        source: Arc<StaticStatsSource>,
        store: Arc<InMemoryStateStore>,
        collector: Arc<InMemoryStatsCollector>,
        metrics: Arc<EngineMetrics>,
        poller: Arc<StatsPoller>,
    }

    fn harness(config: PollerConfig) -> Harness {
        let source = Arc::new(StaticStatsSource::new());
        source.set_document(json!({
            "BUGZILLA_REST_URL": BASE,
            "versions": {
                "release": {"version": 52, "title": "Release"},
                "beta": {"version": 53, "title": "Beta"}
            },
            "bugQueries": [
                {"id": "new", "title": "New", "url": "bug?f1=cf_status_firefox{RELEASE}"}
            ]
        }));
        let store = Arc::new(InMemoryStateStore::new());
        let collector = Arc::new(InMemoryStatsCollector::new());
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let cache = Arc::new(ConfigCache::new(source.clone(), store.clone()));
        let poller = Arc::new(
            StatsPoller::new(
                config,
                cache,
                source.clone(),
                store.clone(),
                collector.clone(),
            )
            .with_metrics(metrics.clone()),
        );

        Harness {
            source,
            store,
            collector,
            metrics,
            poller,
        }
    }

    #[test]
    fn test_poller_config_default() {
        let config = PollerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.config_refresh_interval, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_two_cycle_scenario() {
        let h = harness(PollerConfig::default());
        h.source.set_count(url(52), 10);
        h.source.set_count(url(53), 20);

        let first = h.poller.poll_once().await.unwrap();
        assert_eq!(first.changed, 2);
        let changes = h.collector.metric_changes();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.kind() == ChangeKind::New));
        assert_eq!(changes[0].to_string(), "New metric: Release 52 New: 10");

        h.collector.clear();
        h.source.set_count(url(53), 25);

        let second = h.poller.poll_once().await.unwrap();
        assert_eq!(second.fetched, 2);
        assert_eq!(second.changed, 1);

        let changes = h.collector.metric_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].version_number, 53);
        assert_eq!(changes[0].previous, Some(20));
        assert_eq!(changes[0].current, 25);
        assert_eq!(changes[0].to_string(), "Beta 53 New increased from 20 to 25.");

        let history_52 = h.store.history(&MetricKey::new(52, "new"), 10).await.unwrap();
        let history_53 = h.store.history(&MetricKey::new(53, "new"), 10).await.unwrap();
        assert_eq!(history_52.len(), 1);
        assert_eq!(
            history_53.iter().map(|o| o.value).collect::<Vec<_>>(),
            vec![25, 20]
        );
    }

    #[tokio::test]
    async fn test_unchanged_value_is_idempotent() {
        let h = harness(PollerConfig::default());
        h.source.set_count(url(52), 4);
        h.source.set_count(url(53), 4);

        h.poller.poll_once().await.unwrap();
        let second = h.poller.poll_once().await.unwrap();

        assert_eq!(second.changed, 0);
        assert_eq!(h.collector.len(), 2);
        assert_eq!(h.store.stats().appends, 2);
    }

    #[tokio::test]
    async fn test_change_against_stored_value() {
        let h = harness(PollerConfig::default());
        let key = MetricKey::new(52, "new");
        h.store.append(&key, Observation::now(5)).await.unwrap();
        h.source.set_count(url(52), 7);
        h.source.set_count(url(53), 3);

        h.poller.poll_once().await.unwrap();

        let changes = h.collector.metric_changes();
        assert_eq!(changes[0].previous, Some(5));
        assert_eq!(changes[0].current, 7);
        assert_eq!(changes[1].previous, None);
        assert_eq!(changes[1].current, 3);
        assert_eq!(h.store.latest(&key).await.unwrap().unwrap().value, 7);
    }

    #[tokio::test]
    async fn test_failed_pair_does_not_abort_cycle() {
        let h = harness(PollerConfig::default());
        h.source.fail_count_with_status(url(52), 500);
        h.source.set_count(url(53), 9);

        let summary = h.poller.poll_once().await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.changed, 1);
        assert!(h
            .store
            .latest(&MetricKey::new(52, "new"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            h.metrics
                .fetch_failures
                .with_label_values(&["status"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_poll_without_any_config_fails_softly() {
        let h = harness(PollerConfig::default());
        h.source.fail_config_with_status(503);

        let err = h.poller.poll_once().await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 503, .. }));
        assert_eq!(h.source.count_fetches(), 0);

        // still usable once the document comes back
        h.source.set_document(json!({
            "BUGZILLA_REST_URL": BASE,
            "versions": {"beta": {"version": 53, "title": "Beta"}},
            "bugQueries": [{"id": "new", "title": "New", "url": "bug?f1=cf_status_firefox{RELEASE}"}]
        }));
        h.source.set_count(url(53), 1);
        assert_eq!(h.poller.poll_once().await.unwrap().changed, 1);
    }

    #[tokio::test]
    async fn test_refresh_due_logic() {
        let h = harness(PollerConfig::default());

        assert!(h.poller.maybe_refresh_config().await);
        // not due again within the interval
        assert!(!h.poller.maybe_refresh_config().await);
        assert_eq!(h.source.config_fetches(), 1);
        assert_eq!(
            h.metrics
                .config_refreshes
                .with_label_values(&["success"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_retries_next_tick() {
        let h = harness(PollerConfig::default());
        h.source.fail_config_with_status(500);

        assert!(!h.poller.maybe_refresh_config().await);
        assert!(!h.poller.maybe_refresh_config().await);
        assert_eq!(h.source.config_fetches(), 2);

        h.source.set_document(json!({"versions": {}}));
        assert!(h.poller.maybe_refresh_config().await);
        assert_eq!(
            h.metrics
                .config_refreshes
                .with_label_values(&["failure"])
                .get(),
            2
        );
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let h = harness(PollerConfig {
            poll_interval: Duration::from_millis(20),
            config_refresh_interval: Duration::from_secs(60),
        });
        h.source.set_count(url(52), 1);
        h.source.set_count(url(53), 2);

        let handle = tokio::spawn(Arc::clone(&h.poller).run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.poller.shutdown();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller must stop after shutdown")
            .unwrap();

        assert!(h.metrics.poll_cycles.get() >= 2);
        assert_eq!(h.source.config_fetches(), 1);
        // repeated cycles with the same counts only announce once
        assert_eq!(h.collector.len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_idle_loop() {
        let h = harness(PollerConfig {
            poll_interval: Duration::from_secs(3600),
            config_refresh_interval: Duration::from_secs(3600),
        });
        h.source.set_count(url(52), 1);
        h.source.set_count(url(53), 2);

        let handle = tokio::spawn(Arc::clone(&h.poller).run());
        // let the immediate first ticks run, leaving the loop parked
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.metrics.poll_cycles.get(), 1);

        h.poller.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("shutdown must not wait for the next tick")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_run() {
        let h = harness(PollerConfig {
            poll_interval: Duration::from_secs(3600),
            config_refresh_interval: Duration::from_secs(3600),
        });

        h.poller.shutdown();
        tokio::time::timeout(Duration::from_secs(1), Arc::clone(&h.poller).run())
            .await
            .expect("a stopped poller must return at once");

        assert_eq!(h.metrics.poll_cycles.get(), 0);
        assert_eq!(h.source.config_fetches(), 0);
    }
}
