//! Domain Layer
//!
//! Value objects, ports and events shared by the tracking engine and its
//! adapters.
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for the remote source,
//!   persistence and subscribers
//! - **Events** (`events.rs`) - Change events delivered to subscribers

pub mod events;
pub mod ports;

pub use events::{ChangeKind, MetricChange, StatsEvent, VersionsChange};
pub use ports::{
    ConfigDocument, ConfigStore, HistoryStore, MetricKey, Observation, StatsListener, StatsSource,
    TrackedQuery, TrackedVersion,
};
