//! Static Stats Source
//!
//! Implements the `StatsSource` port from values set in memory. Lets tests
//! and offline runs script the remote side: the document, per-URL counts and
//! failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::domain::{ConfigDocument, StatsSource};
use crate::error::{Error, Result};

const CONFIG_URL: &str = "static://config";

#[derive(Debug, Clone)]
enum Reply<T> {
    Ok(T),
    Status(u16),
}

/// Scripted remote source
#[derive(Debug)]
pub struct StaticStatsSource {
    document: RwLock<Reply<Value>>,
    counts: RwLock<HashMap<String, Reply<i64>>>,
    config_fetches: AtomicUsize,
    count_fetches: AtomicUsize,
}

impl Default for StaticStatsSource {
    fn default() -> Self {
        Self {
            document: RwLock::new(Reply::Status(404)),
            counts: RwLock::new(HashMap::new()),
            config_fetches: AtomicUsize::new(0),
            count_fetches: AtomicUsize::new(0),
        }
    }
}

impl StaticStatsSource {
    /// Source with no document; every fetch answers 404 until scripted.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_document(&self, document: Value) {
        *self.document.write() = Reply::Ok(document);
    }

    pub fn fail_config_with_status(&self, status: u16) {
        *self.document.write() = Reply::Status(status);
    }

    pub fn set_count(&self, url: impl Into<String>, count: i64) {
        self.counts.write().insert(url.into(), Reply::Ok(count));
    }

    pub fn fail_count_with_status(&self, url: impl Into<String>, status: u16) {
        self.counts.write().insert(url.into(), Reply::Status(status));
    }

    /// Number of configuration fetches served, failures included.
    pub fn config_fetches(&self) -> usize {
        self.config_fetches.load(Ordering::SeqCst)
    }

    /// Number of count fetches served, failures included.
    pub fn count_fetches(&self) -> usize {
        self.count_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatsSource for StaticStatsSource {
    async fn fetch_config_document(&self) -> Result<ConfigDocument> {
        self.config_fetches.fetch_add(1, Ordering::SeqCst);

        match &*self.document.read() {
            Reply::Ok(Value::Object(map)) => Ok(map.clone()),
            Reply::Ok(_) => Err(Error::ResponseParse {
                url: CONFIG_URL.to_string(),
                reason: "document is not an object".to_string(),
            }),
            Reply::Status(status) => Err(Error::Status {
                url: CONFIG_URL.to_string(),
                status: *status,
            }),
        }
    }

    async fn fetch_count(&self, url: &str) -> Result<i64> {
        self.count_fetches.fetch_add(1, Ordering::SeqCst);

        match self.counts.read().get(url) {
            Some(Reply::Ok(count)) => Ok(*count),
            Some(Reply::Status(status)) => Err(Error::Status {
                url: url.to_string(),
                status: *status,
            }),
            None => Err(Error::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
