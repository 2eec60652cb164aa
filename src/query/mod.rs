//! Query module
//!
//! Ad-hoc lookups of the latest recorded stats.

mod engine;
mod selector;

pub use engine::{QueryEngine, StatsTable};
pub use selector::{QuerySelector, VersionSelector};
