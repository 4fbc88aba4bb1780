// Two-way synchronization between the settings cell and the persistent store

use crate::notify::Notifier;
use crate::store::{KeyValueStore, StoreError};
use seoscope_graph::{Cell, Graph, Lens, Path, Subscription, path};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Store key holding the settings object.
pub const SETTINGS_KEY: &str = "crawl_settings";

pub const DEFAULT_MAX_CONCURRENT_REQUESTS: u32 = 10;
pub const DEFAULT_REQUEST_DELAY_MS: u32 = 1000;
pub const MAX_REQUEST_DELAY_MS: u32 = 1000;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Stored settings are malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("max_concurrent_requests must be at least 1 (got {0})")]
    TooFewRequests(u32),

    #[error("request_delay_ms must be between 0 and {MAX_REQUEST_DELAY_MS} (got {0})")]
    DelayOutOfRange(u32),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Crawl settings. Missing keys in the stored object take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub max_concurrent_requests: u32,
    pub request_delay_ms: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            request_delay_ms: DEFAULT_REQUEST_DELAY_MS,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_requests < 1 {
            return Err(SettingsError::TooFewRequests(self.max_concurrent_requests));
        }
        if self.request_delay_ms > MAX_REQUEST_DELAY_MS {
            return Err(SettingsError::DelayOutOfRange(self.request_delay_ms));
        }
        Ok(())
    }

    pub fn base_url_path() -> Path<Settings, String> {
        path!(Settings => base_url)
    }
}

/// Partial update. Only the keys that are set are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_requests: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u32>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.base_url.is_none()
            && self.max_concurrent_requests.is_none()
            && self.request_delay_ms.is_none()
    }

    pub fn apply(&self, settings: &Settings) -> Settings {
        Settings {
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| settings.base_url.clone()),
            max_concurrent_requests: self
                .max_concurrent_requests
                .unwrap_or(settings.max_concurrent_requests),
            request_delay_ms: self.request_delay_ms.unwrap_or(settings.request_delay_ms),
        }
    }
}

impl From<Settings> for SettingsPatch {
    fn from(settings: Settings) -> Self {
        Self {
            base_url: Some(settings.base_url),
            max_concurrent_requests: Some(settings.max_concurrent_requests),
            request_delay_ms: Some(settings.request_delay_ms),
        }
    }
}

/// Read the settings object, or the defaults when nothing is stored. Stored
/// values out of range are an error, like a malformed object.
pub async fn load<S: KeyValueStore>(store: &S) -> Result<Settings> {
    let settings: Settings = match store.get(SETTINGS_KEY).await? {
        None | Some(Value::Null) => return Ok(Settings::default()),
        Some(value) => serde_json::from_value(value)?,
    };
    settings.validate()?;
    Ok(settings)
}

/// Shallow-merge `patch` over the stored object and write it back. Keys the
/// patch does not name, including ones this version does not know, are
/// preserved.
pub async fn save<S: KeyValueStore>(store: &S, patch: &SettingsPatch) -> Result<Settings> {
    let mut object = match store.get(SETTINGS_KEY).await? {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Value::Object(update) = serde_json::to_value(patch)? {
        object.extend(update);
    }

    let merged = Value::Object(object);
    let settings: Settings = serde_json::from_value(merged.clone())?;
    settings.validate()?;
    store.set(SETTINGS_KEY, merged).await?;
    Ok(settings)
}

/// Keeps the in-memory settings cell and the store in agreement.
///
/// Local commits to the cell are queued and written in commit order, so the
/// last local write wins. Store changes made elsewhere are reloaded into the
/// cell. A commit equal to the value last loaded or queued is not queued
/// again, so a reload does not echo back into the store.
pub struct SettingsSync<S> {
    store: S,
    notifier: Notifier,
    settings: Cell<Settings>,
    base_url: Lens<Settings, String>,
    // Last value loaded from the store or queued for it.
    expected: Rc<RefCell<Option<Settings>>>,
    writes_tx: mpsc::UnboundedSender<Settings>,
    writes_rx: RefCell<Option<mpsc::UnboundedReceiver<Settings>>>,
    effect: RefCell<Option<Subscription>>,
}

impl<S: KeyValueStore> SettingsSync<S> {
    pub fn new(graph: &Graph, store: S, notifier: Notifier) -> Self {
        let settings = graph.cell(Settings::default());
        let base_url = settings.lens(Settings::base_url_path());
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        Self {
            store,
            notifier,
            settings,
            base_url,
            expected: Rc::new(RefCell::new(None)),
            writes_tx,
            writes_rx: RefCell::new(Some(writes_rx)),
            effect: RefCell::new(None),
        }
    }

    pub fn settings(&self) -> &Cell<Settings> {
        &self.settings
    }

    pub fn base_url(&self) -> &Lens<Settings, String> {
        &self.base_url
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn load(&self) -> Result<Settings> {
        load(&self.store).await
    }

    pub async fn save(&self, patch: impl Into<SettingsPatch>) -> Result<Settings> {
        save(&self.store, &patch.into()).await
    }

    /// Install the effect that persists local commits. Only the first call
    /// installs anything; later calls return `false`.
    pub fn install(&self) -> bool {
        let mut slot = self.effect.borrow_mut();
        if slot.is_some() {
            debug!("Settings persistence already installed");
            return false;
        }

        let expected = self.expected.clone();
        let writes = self.writes_tx.clone();
        let subscription = self
            .settings
            .graph()
            .subscribe(&self.settings, move |value: &Settings| {
                if expected.borrow().as_ref() == Some(value) {
                    return;
                }
                *expected.borrow_mut() = Some(value.clone());
                // The receiver lives as long as the synchronizer.
                let _ = writes.send(value.clone());
            });
        *slot = Some(subscription);
        true
    }

    /// Load once and push the stored value into the cell.
    pub async fn activate(&self) -> bool {
        self.reload().await
    }

    /// Apply a form edit. Invalid values are rejected before they reach the
    /// cell.
    pub fn edit(&self, patch: &SettingsPatch) -> Result<bool> {
        let next = self.settings.with(|current| patch.apply(current));
        if let Err(e) = next.validate() {
            self.notifier.warn(e.to_string());
            return Err(e);
        }
        Ok(self.settings.set(next))
    }

    /// Re-read the store into the cell. On failure, including stored values
    /// that fail validation, the cell keeps its value.
    pub async fn reload(&self) -> bool {
        match self.load().await {
            Ok(settings) => {
                *self.expected.borrow_mut() = Some(settings.clone());
                self.settings.set(settings);
                true
            }
            Err(e) => {
                self.notifier
                    .error(format!("Failed to load settings: {}", e));
                false
            }
        }
    }

    /// Write a queued commit in full. The store drops writes equal to what it
    /// already holds.
    async fn persist(&self, value: Settings) {
        match self.save(value).await {
            Ok(_) => debug!("Settings saved"),
            // The cell keeps the unsaved value.
            Err(e) => self
                .notifier
                .error(format!("Failed to save settings: {}", e)),
        }
    }

    /// Write any queued local commits. Returns how many were processed.
    /// Does nothing while [`SettingsSync::run`] owns the queue.
    pub async fn flush(&self) -> usize {
        let mut processed = 0;
        loop {
            let next = match self.writes_rx.borrow_mut().as_mut() {
                Some(rx) => rx.try_recv().ok(),
                None => None,
            };
            let Some(value) = next else { break };
            self.persist(value).await;
            processed += 1;
        }
        processed
    }

    /// Serve queued writes and external store changes until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(mut writes) = self.writes_rx.borrow_mut().take() else {
            warn!("Settings synchronizer is already running");
            return;
        };
        let mut changes = self.store.subscribe();
        let mut store_open = true;
        info!("Settings synchronizer started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(value) = writes.recv() => self.persist(value).await,
                change = changes.recv(), if store_open => match change {
                    Ok(change) if change.key == SETTINGS_KEY => {
                        // A queued local write supersedes the stored value and
                        // its own change notice reloads it afterwards.
                        if writes.is_empty() {
                            self.reload().await;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} store changes, reloading settings", skipped);
                        self.reload().await;
                    }
                    Err(RecvError::Closed) => {
                        debug!("Store change feed closed");
                        store_open = false;
                    }
                },
            }
        }

        *self.writes_rx.borrow_mut() = Some(writes);
        info!("Settings synchronizer stopped");
    }
}
