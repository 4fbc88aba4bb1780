// Persistent key-value store for application settings

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CHANGE_CAPACITY: usize = 64;

/// Value last announced for each key, by a write or by the watcher.
type Published = Arc<Mutex<HashMap<String, Option<Value>>>>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A key whose value changed, by this handle or by another writer.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub value: Option<Value>,
}

/// Persistent JSON key-value store shared by every window of the app.
#[allow(async_fn_in_trait)]
pub trait KeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write `value`. Subscribers hear about it only if it differs from what
    /// was stored.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store; handles cloned from one another share state.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            changes,
        }
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Mutex poisoned: {}", e)))
    }

    fn publish(&self, key: &str, value: Option<Value>) {
        // No subscribers is fine.
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            value,
        });
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let changed = {
            let mut entries = self.entries()?;
            let changed = entries.get(key) != Some(&value);
            entries.insert(key.to_string(), value.clone());
            changed
        };
        if changed {
            self.publish(key, Some(value));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let removed = self.entries()?.remove(key).is_some();
        if removed {
            self.publish(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

// ============================================================================
// SQLite store
// ============================================================================

/// File-backed store. Several processes may open the same file; use
/// [`SqliteStore::watch`] to hear about their writes.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    changes: broadcast::Sender<StoreChange>,
    published: Published,
}

impl SqliteStore {
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        let store = Self::from_connection(conn, path.to_path_buf());
        store.init_schema()?;
        Ok(store)
    }

    /// Private, throwaway store. Mostly useful in tests.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self::from_connection(Connection::open_in_memory()?, PathBuf::from(":memory:"));
        store.init_schema()?;
        Ok(store)
    }

    fn from_connection(conn: Connection, path: PathBuf) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            changes,
            published: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS kv_store (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                ",
            )?;
            Ok(())
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Mutex poisoned: {}", e)))?;
        f(&conn)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_conn(f)).await?
    }

    fn read(conn: &Connection, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        raw.map(|text| serde_json::from_str(&text).map_err(StoreError::from))
            .transpose()
    }

    fn publish(&self, key: &str, value: Option<Value>) {
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            value,
        });
    }

    /// Remember `value` as the last one announced for `key`. Returns whether
    /// it differs from the previous one.
    fn record(published: &Published, key: &str, value: Option<Value>) -> Result<bool> {
        let mut published = published
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Mutex poisoned: {}", e)))?;
        if published.get(key) == Some(&value) {
            return Ok(false);
        }
        published.insert(key.to_string(), value);
        Ok(true)
    }

    /// Baseline for the watcher: the current version, and the current value
    /// of every key nothing has been announced for yet.
    fn seed(conn: &Connection, published: &Published, keys: &[String]) -> Result<i64> {
        let version = conn.query_row("PRAGMA data_version", [], |row| row.get(0))?;
        for key in keys {
            let value = Self::read(conn, key)?;
            published
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("Mutex poisoned: {}", e)))?
                .entry(key.clone())
                .or_insert(value);
        }
        Ok(version)
    }

    /// Re-read `keys` if another connection committed since `last`. Runs
    /// under the connection lock, so writes through this handle cannot slip
    /// between the read and the comparison.
    fn poll(
        conn: &Connection,
        published: &Published,
        keys: &[String],
        last: Option<i64>,
    ) -> Result<(i64, Vec<StoreChange>)> {
        let version = conn.query_row("PRAGMA data_version", [], |row| row.get(0))?;
        let mut changes = Vec::new();
        if Some(version) == last {
            return Ok((version, changes));
        }
        for key in keys {
            let value = Self::read(conn, key)?;
            if Self::record(published, key, value.clone())? {
                changes.push(StoreChange {
                    key: key.clone(),
                    value,
                });
            }
        }
        Ok((version, changes))
    }

    /// Poll for commits made by other processes and publish changes to
    /// `keys` until `cancel` fires. A value is published when it differs
    /// from the last one announced for its key, whoever wrote that one.
    pub fn watch(
        &self,
        keys: Vec<String>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let (seed_keys, published) = (keys.clone(), store.published.clone());
            let mut version = match store
                .blocking(move |conn| Self::seed(conn, &published, &seed_keys))
                .await
            {
                Ok(version) => Some(version),
                Err(e) => {
                    warn!("Store watcher could not read {}: {}", store.path.display(), e);
                    None
                }
            };
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let (poll_keys, published) = (keys.clone(), store.published.clone());
                let last = version;
                match store
                    .blocking(move |conn| Self::poll(conn, &published, &poll_keys, last))
                    .await
                {
                    Ok((current, changes)) => {
                        version = Some(current);
                        for change in changes {
                            debug!("External change to {}", change.key);
                            let _ = store.changes.send(change);
                        }
                    }
                    Err(e) => {
                        warn!("Store watcher failed to poll {}: {}", store.path.display(), e)
                    }
                }
            }
            debug!("Store watcher stopped");
        })
    }
}

impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        self.blocking(move |conn| Self::read(conn, &key)).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let owned_key = key.to_string();
        let stored = value.clone();
        let published = self.published.clone();
        let changed = self
            .blocking(move |conn| {
                let previous = Self::read(conn, &owned_key)?;
                if previous.as_ref() == Some(&stored) {
                    return Ok(false);
                }
                conn.execute(
                    "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![owned_key, serde_json::to_string(&stored)?, Utc::now().timestamp()],
                )?;
                Self::record(&published, &owned_key, Some(stored))?;
                Ok(true)
            })
            .await?;
        if changed {
            self.publish(key, Some(value));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let owned_key = key.to_string();
        let published = self.published.clone();
        let removed = self
            .blocking(move |conn| {
                let removed = conn.execute("DELETE FROM kv_store WHERE key = ?1", [&owned_key])? > 0;
                if removed {
                    Self::record(&published, &owned_key, None)?;
                }
                Ok(removed)
            })
            .await?;
        if removed {
            self.publish(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
