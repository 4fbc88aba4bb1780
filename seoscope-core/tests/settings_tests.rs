// Tests for settings load/save and the synchronizer

use seoscope_core::notify::{Notifier, NotifyLevel};
use seoscope_core::settings::{
    self, SETTINGS_KEY, Settings, SettingsError, SettingsPatch, SettingsSync,
};
use seoscope_core::store::{KeyValueStore, MemoryStore, StoreChange, StoreError};
use seoscope_graph::Graph;
use serde_json::{Value, json};
use std::cell::Cell as StdCell;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Memory store that counts writes and can be told to fail them.
#[derive(Clone, Default)]
struct TestStore {
    inner: MemoryStore,
    writes: std::rc::Rc<StdCell<usize>>,
    fail_writes: std::rc::Rc<StdCell<bool>>,
}

impl KeyValueStore for TestStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        if self.fail_writes.get() {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.writes.set(self.writes.get() + 1);
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.subscribe()
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Load / Save Tests
// ============================================================================

#[tokio::test]
async fn test_load_absent_returns_defaults() {
    let store = MemoryStore::new();
    assert_eq!(settings::load(&store).await.unwrap(), Settings::default());
}

#[tokio::test]
async fn test_load_malformed_is_an_error() {
    let store = MemoryStore::new();
    store
        .set(SETTINGS_KEY, json!({"max_concurrent_requests": "many"}))
        .await
        .unwrap();
    assert!(settings::load(&store).await.is_err());
}

#[tokio::test]
async fn test_save_merges_shallowly() {
    let store = MemoryStore::new();
    store
        .set(
            SETTINGS_KEY,
            json!({"base_url": "a", "max_concurrent_requests": 5, "request_delay_ms": 100}),
        )
        .await
        .unwrap();

    let patch = SettingsPatch {
        max_concurrent_requests: Some(8),
        ..Default::default()
    };
    settings::save(&store, &patch).await.unwrap();

    assert_eq!(
        store.get(SETTINGS_KEY).await.unwrap(),
        Some(json!({"base_url": "a", "max_concurrent_requests": 8, "request_delay_ms": 100}))
    );
}

#[tokio::test]
async fn test_save_of_load_leaves_store_unchanged() {
    let store = MemoryStore::new();
    let stored = json!({
        "base_url": "https://a.test",
        "max_concurrent_requests": 3,
        "request_delay_ms": 0,
        "theme": "dark"
    });
    store.set(SETTINGS_KEY, stored.clone()).await.unwrap();

    let loaded = settings::load(&store).await.unwrap();
    settings::save(&store, &SettingsPatch::from(loaded)).await.unwrap();

    assert_eq!(store.get(SETTINGS_KEY).await.unwrap(), Some(stored));
}

#[tokio::test]
async fn test_load_rejects_out_of_range_values() {
    let store = MemoryStore::new();
    store
        .set(SETTINGS_KEY, json!({"request_delay_ms": 5000}))
        .await
        .unwrap();
    assert!(matches!(
        settings::load(&store).await,
        Err(SettingsError::DelayOutOfRange(5000))
    ));
}

#[tokio::test]
async fn test_save_rejects_invalid_values() {
    let store = MemoryStore::new();
    let patch = SettingsPatch {
        request_delay_ms: Some(5000),
        ..Default::default()
    };
    assert!(settings::save(&store, &patch).await.is_err());
    assert_eq!(store.get(SETTINGS_KEY).await.unwrap(), None);
}

// ============================================================================
// Synchronizer Tests
// ============================================================================

#[tokio::test]
async fn test_activate_loads_into_cell() {
    let store = MemoryStore::new();
    store
        .set(SETTINGS_KEY, json!({"base_url": "https://stored.test"}))
        .await
        .unwrap();
    let graph = Graph::new();
    let sync = SettingsSync::new(&graph, store, Notifier::silent());

    assert!(sync.activate().await);
    assert_eq!(sync.base_url().get(), "https://stored.test");
    assert_eq!(sync.settings().get().max_concurrent_requests, 10);
}

#[tokio::test]
async fn test_install_is_idempotent() {
    let graph = Graph::new();
    let sync = SettingsSync::new(&graph, MemoryStore::new(), Notifier::silent());

    assert!(sync.install());
    assert!(!sync.install());
    assert_eq!(graph.effect_count(), 1);
}

#[tokio::test]
async fn test_local_edit_is_persisted() {
    let store = TestStore::default();
    let graph = Graph::new();
    let sync = SettingsSync::new(&graph, store.clone(), Notifier::silent());
    sync.activate().await;
    sync.install();

    sync.base_url().set("https://edited.test".to_string());
    assert_eq!(sync.flush().await, 1);

    let stored = store.get(SETTINGS_KEY).await.unwrap().unwrap();
    assert_eq!(stored["base_url"], "https://edited.test");
    assert_eq!(stored["request_delay_ms"], 1000);
}

#[tokio::test]
async fn test_rapid_edits_last_write_wins() {
    let store = TestStore::default();
    let graph = Graph::new();
    let sync = SettingsSync::new(&graph, store.clone(), Notifier::silent());
    sync.install();

    for delay in [100, 200, 300] {
        sync.edit(&SettingsPatch {
            request_delay_ms: Some(delay),
            ..Default::default()
        })
        .unwrap();
    }
    assert_eq!(sync.flush().await, 3);

    let stored = settings::load(&store).await.unwrap();
    assert_eq!(stored.request_delay_ms, 300);
    assert_eq!(stored, sync.settings().get());
}

#[tokio::test]
async fn test_edit_reverted_before_flush_is_saved() {
    let store = TestStore::default();
    let graph = Graph::new();
    let sync = SettingsSync::new(&graph, store.clone(), Notifier::silent());
    sync.activate().await;
    sync.install();

    sync.base_url().set("https://q.test".to_string());
    sync.base_url().set(String::new());
    assert_eq!(sync.flush().await, 2);

    let stored = settings::load(&store).await.unwrap();
    assert_eq!(stored.base_url, "");
    assert_eq!(stored, sync.settings().get());
}

#[tokio::test]
async fn test_reverted_edit_survives_own_change_notices() {
    let store = MemoryStore::new();
    let graph = Graph::new();
    let sync = SettingsSync::new(&graph, store.clone(), Notifier::silent());
    sync.activate().await;
    sync.install();

    let cancel = CancellationToken::new();
    let driver = async {
        sync.base_url().set("https://q.test".to_string());
        sync.base_url().set(String::new());
        for _ in 0..200 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
    };
    tokio::join!(sync.run(cancel.clone()), driver);

    assert_eq!(sync.base_url().get(), "");
    assert_eq!(settings::load(&store).await.unwrap().base_url, "");
}

#[tokio::test]
async fn test_out_of_range_store_value_is_not_loaded() {
    let store = TestStore::default();
    store
        .inner
        .set(SETTINGS_KEY, json!({"base_url": "a", "request_delay_ms": 5000}))
        .await
        .unwrap();
    let (notifier, mut notifications) = Notifier::channel();
    let graph = Graph::new();
    let sync = SettingsSync::new(&graph, store.clone(), notifier);
    sync.install();

    assert!(!sync.activate().await);
    assert_eq!(sync.settings().get(), Settings::default());
    assert_eq!(notifications.try_recv().unwrap().level, NotifyLevel::Error);

    sync.edit(&SettingsPatch {
        base_url: Some("https://fixed.test".to_string()),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(sync.flush().await, 1);

    let stored = settings::load(&store).await.unwrap();
    assert_eq!(stored.base_url, "https://fixed.test");
    assert_eq!(stored.request_delay_ms, 1000);
}

#[tokio::test]
async fn test_reload_does_not_echo_a_save() {
    let store = TestStore::default();
    let graph = Graph::new();
    let sync = SettingsSync::new(&graph, store.clone(), Notifier::silent());
    sync.install();

    store
        .inner
        .set(SETTINGS_KEY, json!({"base_url": "https://elsewhere.test"}))
        .await
        .unwrap();
    assert!(sync.reload().await);

    assert_eq!(sync.base_url().get(), "https://elsewhere.test");
    assert_eq!(sync.flush().await, 0);
    assert_eq!(store.writes.get(), 0);
}

#[tokio::test]
async fn test_invalid_edit_is_rejected() {
    let (notifier, mut notifications) = Notifier::channel();
    let graph = Graph::new();
    let sync = SettingsSync::new(&graph, MemoryStore::new(), notifier);
    sync.install();

    let result = sync.edit(&SettingsPatch {
        max_concurrent_requests: Some(0),
        ..Default::default()
    });
    assert!(result.is_err());
    assert_eq!(sync.settings().get(), Settings::default());
    assert_eq!(notifications.try_recv().unwrap().level, NotifyLevel::Warn);
    assert_eq!(sync.flush().await, 0);
}

#[tokio::test]
async fn test_save_failure_keeps_edit_and_notifies() {
    let store = TestStore::default();
    store.fail_writes.set(true);
    let (notifier, mut notifications) = Notifier::channel();
    let graph = Graph::new();
    let sync = SettingsSync::new(&graph, store.clone(), notifier);
    sync.install();

    sync.base_url().set("https://unsaved.test".to_string());
    sync.flush().await;

    assert_eq!(sync.base_url().get(), "https://unsaved.test");
    let notification = notifications.try_recv().unwrap();
    assert_eq!(notification.level, NotifyLevel::Error);
    assert!(notification.message.contains("disk full"));
    assert_eq!(store.inner.get(SETTINGS_KEY).await.unwrap(), None);
}

#[tokio::test]
async fn test_load_failure_keeps_previous_value() {
    let store = MemoryStore::new();
    let (notifier, mut notifications) = Notifier::channel();
    let graph = Graph::new();
    let sync = SettingsSync::new(&graph, store.clone(), notifier);
    sync.base_url().set("https://last-known.test".to_string());

    store.set(SETTINGS_KEY, json!("not an object")).await.unwrap();
    assert!(!sync.reload().await);

    assert_eq!(sync.base_url().get(), "https://last-known.test");
    assert_eq!(notifications.try_recv().unwrap().level, NotifyLevel::Error);
}

#[tokio::test]
async fn test_two_windows_converge() {
    let store = MemoryStore::new();
    let graph_a = Graph::new();
    let graph_b = Graph::new();
    let window_a = SettingsSync::new(&graph_a, store.clone(), Notifier::silent());
    let window_b = SettingsSync::new(&graph_b, store.clone(), Notifier::silent());
    window_a.install();
    window_b.install();

    let cancel = CancellationToken::new();
    let driver = async {
        window_a
            .base_url()
            .set("https://from-a.test".to_string());
        wait_until(|| window_b.base_url().get() == "https://from-a.test").await;
        cancel.cancel();
    };
    tokio::join!(
        window_a.run(cancel.clone()),
        window_b.run(cancel.clone()),
        driver
    );

    assert_eq!(window_b.base_url().get(), "https://from-a.test");
    assert_eq!(
        settings::load(&store).await.unwrap().base_url,
        "https://from-a.test"
    );
}

#[tokio::test]
async fn test_run_stops_on_cancel_and_returns_queue() {
    let graph = Graph::new();
    let sync = SettingsSync::new(&graph, MemoryStore::new(), Notifier::silent());
    sync.install();

    let cancel = CancellationToken::new();
    cancel.cancel();
    sync.run(cancel).await;

    sync.base_url().set("https://after.test".to_string());
    assert_eq!(sync.flush().await, 1);
}
