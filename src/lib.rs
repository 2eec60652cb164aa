//! releasewatch - Release Health Tracker
//!
//! Polls bug counts for every tracked release and query, keeps the history of
//! each count, and tells subscribers whenever a count changes.
//!
//! # Architecture
//!
//! ```text
//! Config Cache → Stats Poller (Eyes) → History Store → Listener
//!                      ▲
//!                      └── Query Engine reads the same cache and history
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Infrastructure adapters implementing domain ports
//! - [`domain`] - Value objects, ports and change events
//! - [`error`] - Error types
//! - [`poller`] - Poll loop and change detection
//! - [`query`] - Read-only lookups with wildcard and prefix selectors
//! - [`telemetry`] - Prometheus counters for the engine
//! - [`tracking`] - Tracking configuration and its cache

pub mod adapters;
pub mod domain;
pub mod error;
pub mod poller;
pub mod query;
pub mod telemetry;
pub mod tracking;

// Re-export commonly used types
pub use domain::{MetricChange, MetricKey, Observation, StatsEvent, VersionsChange};
pub use error::{Error, Result};
pub use poller::{PollerConfig, StatsPoller};
pub use query::{QueryEngine, QuerySelector, VersionSelector};
pub use telemetry::EngineMetrics;
pub use tracking::{ConfigCache, TrackingConfig};
