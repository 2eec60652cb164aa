//! Poller module
//!
//! Periodic polling of tracked metrics with change detection.

mod engine;

pub use engine::{PollSummary, PollerConfig, StatsPoller};
