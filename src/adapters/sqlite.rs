//! SQLite State Store
//!
//! Durable implementation of `ConfigStore` and `HistoryStore`. Configuration
//! sections live one row per top-level key; observations are an append-only
//! table where the highest row id per metric key is the head of its history.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;
use tracing::{debug, info_span};

use crate::domain::{ConfigDocument, ConfigStore, HistoryStore, MetricKey, Observation};
use crate::error::{Error, Result};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS config_entries (
    key    TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS observations (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    metric_key   TEXT NOT NULL,
    value        INTEGER NOT NULL,
    observed_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS observations_by_key ON observations (metric_key, id DESC);
";

/// SQLite-backed state store.
///
/// The connection is shared behind a mutex. Every statement runs on the
/// blocking pool so async workers never wait on disk I/O.
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Open or create a store at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let _span = info_span!("state_store_open", path = %db_path.display()).entered();

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Total number of stored observations.
    pub fn observation_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
            .await
            .map_err(|e| Error::Internal(format!("State store task failed: {}", e)))?
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad stored timestamp '{}': {}", raw, e)))
}

fn row_to_observation(value: i64, observed_at: String) -> Result<Observation> {
    Ok(Observation::new(value, parse_timestamp(&observed_at)?))
}

impl std::fmt::Debug for SqliteStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl ConfigStore for SqliteStateStore {
    async fn entries(&self) -> Result<ConfigDocument> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM config_entries ORDER BY key")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut document = ConfigDocument::new();
            for row in rows {
                let (key, raw) = row?;
                document.insert(key, serde_json::from_str(&raw)?);
            }
            Ok(document)
        })
        .await
    }

    async fn entry(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let key = key.to_string();
        let raw: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM config_entries WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        raw.map(|r| serde_json::from_str(&r).map_err(Error::from))
            .transpose()
    }

    async fn has_entries(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM config_entries", [], |row| row.get(0))?;
            Ok(count > 0)
        })
        .await
    }

    async fn replace_entries(&self, document: &ConfigDocument) -> Result<()> {
        let encoded = document
            .iter()
            .map(|(key, value)| Ok((key.clone(), serde_json::to_string(value)?)))
            .collect::<Result<Vec<_>>>()?;
        let count = encoded.len();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM config_entries", [])?;
            {
                let mut insert =
                    tx.prepare("INSERT INTO config_entries (key, value) VALUES (?1, ?2)")?;
                for (key, value) in &encoded {
                    insert.execute(params![key, value])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        debug!("Replaced {} configuration entries", count);
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for SqliteStateStore {
    async fn latest(&self, key: &MetricKey) -> Result<Option<Observation>> {
        let key = key.as_str().to_string();
        let row: Option<(i64, String)> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value, observed_at FROM observations \
                         WHERE metric_key = ?1 ORDER BY id DESC LIMIT 1",
                        params![key],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?)
            })
            .await?;

        row.map(|(value, at)| row_to_observation(value, at))
            .transpose()
    }

    async fn append(&self, key: &MetricKey, observation: Observation) -> Result<()> {
        let key = key.as_str().to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO observations (metric_key, value, observed_at) VALUES (?1, ?2, ?3)",
                params![key, observation.value, observation.observed_at.to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn history(&self, key: &MetricKey, limit: usize) -> Result<Vec<Observation>> {
        let key = key.as_str().to_string();
        let rows: Vec<(i64, String)> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT value, observed_at FROM observations \
                     WHERE metric_key = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![key, limit as i64], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await?;

        rows.into_iter()
            .map(|(value, at)| row_to_observation(value, at))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_latest() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let key = MetricKey::new(53, "known");

        assert!(store.latest(&key).await.unwrap().is_none());

        store.append(&key, Observation::now(20)).await.unwrap();
        store.append(&key, Observation::now(25)).await.unwrap();

        assert_eq!(store.latest(&key).await.unwrap().unwrap().value, 25);
        let values: Vec<i64> = store
            .history(&key, 5)
            .await
            .unwrap()
            .iter()
            .map(|o| o.value)
            .collect();
        assert_eq!(values, vec![25, 20]);
        assert_eq!(store.observation_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let key = MetricKey::new(52, "new");
        let doc = json!({"BUGZILLA_REST_URL": "https://x/", "bugQueries": []});

        {
            let store = SqliteStateStore::open(&path).unwrap();
            store.append(&key, Observation::now(10)).await.unwrap();
            store
                .replace_entries(doc.as_object().unwrap())
                .await
                .unwrap();
        }

        let store = SqliteStateStore::open(&path).unwrap();
        assert_eq!(store.latest(&key).await.unwrap().unwrap().value, 10);
        assert!(store.has_entries().await.unwrap());
        assert_eq!(
            store.entry("BUGZILLA_REST_URL").await.unwrap().unwrap(),
            json!("https://x/")
        );
    }

    #[tokio::test]
    async fn test_timestamps_round_trip() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let key = MetricKey::new(52, "new");
        let obs = Observation::now(3);

        store.append(&key, obs).await.unwrap();
        let stored = store.latest(&key).await.unwrap().unwrap();

        assert_eq!(stored.observed_at, obs.observed_at);
    }

    #[tokio::test]
    async fn test_replace_entries_is_whole_document() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let first = json!({"versions": {"beta": {"version": 53, "title": "Beta"}}, "old": 1});
        let second = json!({"versions": {"beta": {"version": 54, "title": "Beta"}}});

        store
            .replace_entries(first.as_object().unwrap())
            .await
            .unwrap();
        store
            .replace_entries(second.as_object().unwrap())
            .await
            .unwrap();

        let entries = store.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["versions"], second["versions"]);
        assert!(store.entry("old").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_from_many_tasks() {
        let store = Arc::new(SqliteStateStore::open_in_memory().unwrap());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let key = MetricKey::new(50 + i % 4, "new");
                    store.append(&key, Observation::now(i)).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.observation_count().unwrap(), 16);
        for version in 50..54 {
            let history = store.history(&MetricKey::new(version, "new"), 10).await.unwrap();
            assert_eq!(history.len(), 4);
            assert!(history.iter().all(|o| o.value % 4 == version - 50));
        }
    }
}
