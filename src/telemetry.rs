//! Engine telemetry
//!
//! Prometheus counters describing poll and refresh activity, kept on a private
//! registry so several engines (and tests) never collide.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};

/// Counters updated by the polling engine
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,

    /// Completed poll cycles
    pub poll_cycles: IntCounter,

    /// (version, query) pairs fetched
    pub pairs_polled: IntCounter,

    /// Failed fetches by error kind
    pub fetch_failures: IntCounterVec,

    /// Recorded changes by direction (new, increased, decreased)
    pub metric_changes: IntCounterVec,

    /// Configuration refreshes by outcome (success, failure)
    pub config_refreshes: IntCounterVec,

    /// Pairs in the current configuration
    pub tracked_pairs: IntGauge,
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let poll_cycles = IntCounter::new(
            "releasewatch_poll_cycles_total",
            "Total number of completed poll cycles",
        )
        .map_err(registration_error)?;
        let pairs_polled = IntCounter::new(
            "releasewatch_pairs_polled_total",
            "Total number of version/query pairs fetched",
        )
        .map_err(registration_error)?;
        let fetch_failures = IntCounterVec::new(
            Opts::new(
                "releasewatch_fetch_failures_total",
                "Total number of failed remote fetches",
            ),
            &["kind"],
        )
        .map_err(registration_error)?;
        let metric_changes = IntCounterVec::new(
            Opts::new(
                "releasewatch_metric_changes_total",
                "Total number of recorded metric changes",
            ),
            &["direction"],
        )
        .map_err(registration_error)?;
        let config_refreshes = IntCounterVec::new(
            Opts::new(
                "releasewatch_config_refreshes_total",
                "Total number of tracking configuration refreshes",
            ),
            &["outcome"],
        )
        .map_err(registration_error)?;
        let tracked_pairs = IntGauge::new(
            "releasewatch_tracked_pairs",
            "Number of version/query pairs in the current configuration",
        )
        .map_err(registration_error)?;

        registry
            .register(Box::new(poll_cycles.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(pairs_polled.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(fetch_failures.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(metric_changes.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(config_refreshes.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(tracked_pairs.clone()))
            .map_err(registration_error)?;

        Ok(Self {
            registry,
            poll_cycles,
            pairs_polled,
            fetch_failures,
            metric_changes,
            config_refreshes,
            tracked_pairs,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every registered metric, with its content type.
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("poll_cycles", &self.poll_cycles.get())
            .field("pairs_polled", &self.pairs_polled.get())
            .field("tracked_pairs", &self.tracked_pairs.get())
            .finish()
    }
}

fn registration_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Failed to register metric: {}", e))
}
