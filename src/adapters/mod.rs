//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  StatsSource │ ConfigStore │ HistoryStore │ StatsListener  │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ RestStatsSource │ StaticStatsSource                        │ │
//! │  │ SqliteStateStore │ InMemoryStateStore                      │ │
//! │  │ LoggingStatsListener │ InMemoryStatsCollector              │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use releasewatch::adapters::{FetchConfig, RestStatsSource, SqliteStateStore};
//! use releasewatch::domain::HistoryStore;
//!
//! let source = RestStatsSource::new(FetchConfig::default())?;
//! let store = SqliteStateStore::open(Path::new("releasewatch.db"))?;
//!
//! let latest = store.latest(&MetricKey::new(53, "new")).await?;
//! ```

mod listener;
mod memory;
mod rest;
mod sqlite;
mod static_source;

pub use listener::{InMemoryStatsCollector, LoggingStatsListener};
pub use memory::{InMemoryStateStore, StoreStats};
pub use rest::{FetchConfig, RestStatsSource};
pub use sqlite::SqliteStateStore;
pub use static_source::StaticStatsSource;
