//! Configuration Cache
//!
//! Owns the in-memory [`TrackingConfig`]. The remote document is persisted one
//! top-level key per entry; the parsed view is rebuilt lazily from the
//! persisted entries after every successful refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::config::{parse_versions, TrackingConfig, VERSIONS_KEY};
use crate::domain::{ConfigStore, StatsListener, StatsSource, VersionsChange};
use crate::error::Result;

/// Lazily loaded, explicitly refreshed tracking configuration.
pub struct ConfigCache {
    source: Arc<dyn StatsSource>,
    store: Arc<dyn ConfigStore>,
    listener: Option<Arc<dyn StatsListener>>,

    /// Parsed configuration, `None` until loaded or after invalidation
    current: RwLock<Option<Arc<TrackingConfig>>>,

    /// Bumped on every invalidation; a load that started before one is not
    /// installed
    generation: AtomicU64,

    /// Serializes remote fetches. Readers of the persisted entries never take it.
    fetch_lock: Mutex<()>,
}

impl ConfigCache {
    pub fn new(source: Arc<dyn StatsSource>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            source,
            store,
            listener: None,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Notify `listener` when the tracked version set changes.
    pub fn with_listener(mut self, listener: Arc<dyn StatsListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Fetch the remote document and persist it.
    ///
    /// On failure nothing persisted or cached is touched.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.fetch_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<()> {
        let document = self.source.fetch_config_document().await.map_err(|e| {
            error!("Error fetching tracking configuration: {}", e);
            e
        })?;

        if let Some(new_versions) = document.get(VERSIONS_KEY) {
            self.check_versions(new_versions).await;
        }

        self.store.replace_entries(&document).await.map_err(|e| {
            error!("Error persisting tracking configuration: {}", e);
            e
        })?;

        self.invalidate();
        info!(
            "Stored tracking configuration ({} sections)",
            document.len()
        );
        Ok(())
    }

    /// Compare the incoming `versions` section with the persisted one and tell
    /// the listener about a difference. Runs before the new value is stored.
    async fn check_versions(&self, new_versions: &serde_json::Value) {
        let Some(listener) = &self.listener else {
            return;
        };

        let old_versions = match self.store.entry(VERSIONS_KEY).await {
            Ok(Some(old)) => old,
            Ok(None) => {
                debug!("No previous version set, skipping change check");
                return;
            }
            Err(e) => {
                warn!("Could not read previous version set: {}", e);
                return;
            }
        };

        if &old_versions == new_versions {
            return;
        }

        let change = VersionsChange {
            old: parse_versions(&old_versions),
            new: parse_versions(new_versions),
        };
        info!("{}", change);

        if let Err(e) = listener.on_versions_changed(&change).await {
            warn!("Version change listener failed: {}", e);
        }
    }

    /// Current configuration, refreshing once if nothing was ever persisted.
    ///
    /// Concurrent first callers share a single refresh. Once something is
    /// persisted this never waits on a refresh in flight.
    #[instrument(skip(self))]
    pub async fn get(&self) -> Result<Arc<TrackingConfig>> {
        if let Some(config) = self.current().await? {
            return Ok(config);
        }

        let _guard = self.fetch_lock.lock().await;
        if !self.store.has_entries().await? {
            info!("No stored tracking configuration, fetching it");
            self.refresh_locked().await?;
        }

        self.load_persisted().await
    }

    /// Configuration from memory or the persisted entries, without any remote
    /// fetch. `None` if nothing was ever persisted.
    pub async fn current(&self) -> Result<Option<Arc<TrackingConfig>>> {
        if let Some(config) = self.cached() {
            return Ok(Some(config));
        }

        if !self.store.has_entries().await? {
            return Ok(None);
        }

        self.load_persisted().await.map(Some)
    }

    async fn load_persisted(&self) -> Result<Arc<TrackingConfig>> {
        let generation = self.generation.load(Ordering::SeqCst);
        let entries = self.store.entries().await?;
        let config = Arc::new(TrackingConfig::from_document(&entries));
        debug!(
            "Parsed tracking configuration: {} versions, {} queries",
            config.versions().count(),
            config.queries().len()
        );

        let mut current = self.current.write();
        if self.generation.load(Ordering::SeqCst) == generation {
            *current = Some(Arc::clone(&config));
        }
        Ok(config)
    }

    /// In-memory configuration, if loaded.
    pub fn cached(&self) -> Option<Arc<TrackingConfig>> {
        self.current.read().clone()
    }

    /// Drop the in-memory configuration; the next access re-parses.
    pub fn invalidate(&self) {
        let mut current = self.current.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *current = None;
    }
}

impl std::fmt::Debug for ConfigCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigCache")
            .field("loaded", &self.current.read().is_some())
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}
