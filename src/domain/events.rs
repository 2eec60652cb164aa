//! Domain Events
//!
//! Immutable records of what the tracking engine observed. Listeners receive
//! them through the [`StatsListener`](super::ports::StatsListener) port.
//!
//! # Example
//!
//! ```ignore
//! let change = MetricChange {
//!     version_number: 53,
//!     version_title: "Beta".to_string(),
//!     query_title: "Known Issues".to_string(),
//!     previous: Some(20),
//!     current: 25,
//!     observed_at: Utc::now(),
//! };
//!
//! assert_eq!(change.to_string(), "Beta 53 Known Issues increased from 20 to 25.");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ports::TrackedVersion;

/// Direction of a change relative to the previous value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// First value ever recorded for the metric
    New,
    Increased,
    Decreased,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::New => write!(f, "new"),
            ChangeKind::Increased => write!(f, "increased"),
            ChangeKind::Decreased => write!(f, "decreased"),
        }
    }
}

/// A metric whose fetched value differs from its last recorded one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricChange {
    pub version_number: i64,
    pub version_title: String,
    pub query_title: String,
    /// `None` when the metric had no history
    pub previous: Option<i64>,
    pub current: i64,
    pub observed_at: DateTime<Utc>,
}

impl MetricChange {
    pub fn kind(&self) -> ChangeKind {
        match self.previous {
            None => ChangeKind::New,
            Some(old) if old < self.current => ChangeKind::Increased,
            Some(_) => ChangeKind::Decreased,
        }
    }
}

impl std::fmt::Display for MetricChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.previous {
            None => write!(
                f,
                "New metric: {} {} {}: {}",
                self.version_title, self.version_number, self.query_title, self.current
            ),
            Some(old) => write!(
                f,
                "{} {} {} {} from {} to {}.",
                self.version_title,
                self.version_number,
                self.query_title,
                self.kind(),
                old,
                self.current
            ),
        }
    }
}

/// The tracked version set changed between two configuration refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionsChange {
    pub old: Vec<TrackedVersion>,
    pub new: Vec<TrackedVersion>,
}

impl VersionsChange {
    /// Versions present now that were not tracked before.
    pub fn added(&self) -> Vec<&TrackedVersion> {
        self.new
            .iter()
            .filter(|v| !self.old.iter().any(|o| o.number == v.number))
            .collect()
    }

    /// Versions no longer tracked.
    pub fn removed(&self) -> Vec<&TrackedVersion> {
        self.old
            .iter()
            .filter(|o| !self.new.iter().any(|v| v.number == o.number))
            .collect()
    }

    /// Versions kept under a different title or label, e.g. a promotion
    /// from "Beta" to "Release". Pairs are (old, new).
    pub fn retitled(&self) -> Vec<(&TrackedVersion, &TrackedVersion)> {
        self.old
            .iter()
            .filter_map(|o| {
                self.new
                    .iter()
                    .find(|v| v.number == o.number && (v.title != o.title || v.label != o.label))
                    .map(|v| (o, v))
            })
            .collect()
    }
}

impl std::fmt::Display for VersionsChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        for v in self.added() {
            parts.push(format!("now tracking {} {}", v.title, v.number));
        }
        for v in self.removed() {
            parts.push(format!("no longer tracking {} {}", v.title, v.number));
        }
        for (old, new) in self.retitled() {
            parts.push(format!("{} {} is now {}", old.title, old.number, new.title));
        }

        if parts.is_empty() {
            write!(f, "Tracked versions updated.")
        } else {
            write!(f, "Tracked versions changed: {}.", parts.join(", "))
        }
    }
}

/// Event emitted by the tracking engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StatsEvent {
    MetricChanged(MetricChange),
    VersionsChanged(VersionsChange),
}

impl StatsEvent {
    /// Event type name for filtering and logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            StatsEvent::MetricChanged(_) => "MetricChanged",
            StatsEvent::VersionsChanged(_) => "VersionsChanged",
        }
    }
}

impl std::fmt::Display for StatsEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsEvent::MetricChanged(c) => c.fmt(f),
            StatsEvent::VersionsChanged(c) => c.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(previous: Option<i64>, current: i64) -> MetricChange {
        MetricChange {
            version_number: 53,
            version_title: "Beta".into(),
            query_title: "New".into(),
            previous,
            current,
            observed_at: Utc::now(),
        }
    }

    fn version(number: i64, title: &str, label: &str) -> TrackedVersion {
        TrackedVersion {
            number,
            title: title.into(),
            label: label.into(),
        }
    }

    #[test]
    fn test_new_metric_message() {
        let c = change(None, 3);
        assert_eq!(c.kind(), ChangeKind::New);
        assert_eq!(c.to_string(), "New metric: Beta 53 New: 3");
    }

    #[test]
    fn test_increase_and_decrease_messages() {
        assert_eq!(
            change(Some(20), 25).to_string(),
            "Beta 53 New increased from 20 to 25."
        );
        assert_eq!(
            change(Some(25), 4).to_string(),
            "Beta 53 New decreased from 25 to 4."
        );
    }

    #[test]
    fn test_versions_change_diff() {
        let change = VersionsChange {
            old: vec![version(52, "Release", "release"), version(53, "Beta", "beta")],
            new: vec![version(53, "Release", "release"), version(54, "Beta", "beta")],
        };

        let added: Vec<i64> = change.added().iter().map(|v| v.number).collect();
        let removed: Vec<i64> = change.removed().iter().map(|v| v.number).collect();
        let retitled = change.retitled();

        assert_eq!(added, vec![54]);
        assert_eq!(removed, vec![52]);
        assert_eq!(retitled.len(), 1);
        assert_eq!(retitled[0].0.title, "Beta");
        assert_eq!(retitled[0].1.title, "Release");
        assert_eq!(
            change.to_string(),
            "Tracked versions changed: now tracking Beta 54, no longer tracking Release 52, \
             Beta 53 is now Release."
        );
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = StatsEvent::MetricChanged(change(Some(1), 2));
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"type\":\"MetricChanged\""));
        assert!(json.contains("\"previous\":1"));
        assert_eq!(event.event_type(), "MetricChanged");
    }
}
