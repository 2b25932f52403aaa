use std::sync::Arc;

use cubescope::capture::model::CapturedRequest;
use cubescope::capture::{Exchange, ExchangeRequest};
use cubescope::store::settings::{DEFAULT_URL, SETTINGS_STORAGE_KEY, SETTINGS_VERSION};
use cubescope::store::{FileStore, KeyValueStore, MemoryStore, Settings, SettingsStore};
use cubescope::{CubescopeError, Panel};
use serde_json::{Map, json};
use tempfile::TempDir;

async fn capture(panel: &mut Panel, exchange: Exchange) -> Option<CapturedRequest> {
    if !panel.on_exchange(exchange) {
        return None;
    }
    panel.next_captured().await
}

#[test]
fn test_fresh_store_has_defaults() {
    let store = SettingsStore::open(Arc::new(MemoryStore::new()));
    let settings = store.current();

    assert_eq!(settings.urls, vec![DEFAULT_URL.to_string()]);
    assert!(settings.auto_capture);
    assert_eq!(settings.version, SETTINGS_VERSION);
}

#[test]
fn test_saved_settings_are_reloaded_from_disk() {
    let temp_dir = TempDir::new().unwrap();
    {
        let mut store = SettingsStore::open(Arc::new(FileStore::in_dir(temp_dir.path())));
        let mut settings = store.current().clone();
        settings.add_url("https://api.example.com/cubejs-api/v1");
        settings.auto_capture = false;
        store.save(settings);
    }

    let store = SettingsStore::open(Arc::new(FileStore::in_dir(temp_dir.path())));
    assert_eq!(
        store.current().urls,
        vec![
            DEFAULT_URL.to_string(),
            "https://api.example.com/cubejs-api/v1".to_string()
        ]
    );
    assert!(!store.current().auto_capture);
}

#[test]
fn test_partial_stored_value_gets_defaults() {
    let kv = Arc::new(MemoryStore::new());
    let mut entries = Map::new();
    entries.insert(
        SETTINGS_STORAGE_KEY.to_string(),
        json!({"urls": ["https://api.example.com/cubejs-api/v1"], "version": "0"}),
    );
    kv.set(entries).unwrap();

    let settings = SettingsStore::open(kv).load();
    assert_eq!(settings.urls[0], DEFAULT_URL);
    assert_eq!(settings.urls.len(), 2);
    assert!(settings.auto_capture);
    assert_eq!(settings.version, "0");
}

#[test]
fn test_default_url_cannot_be_removed() {
    let mut settings = Settings::default();
    settings.add_url("https://api.example.com/cubejs-api/v1");

    assert!(matches!(
        settings.remove_url(0),
        Err(CubescopeError::Settings(_))
    ));
    assert!(matches!(
        settings.remove_url(5),
        Err(CubescopeError::Settings(_))
    ));
    assert_eq!(
        settings.remove_url(1).unwrap(),
        "https://api.example.com/cubejs-api/v1"
    );
    assert_eq!(settings.urls, vec![DEFAULT_URL.to_string()]);
}

#[tokio::test]
async fn test_subscribers_see_saved_settings() {
    let mut store = SettingsStore::open(Arc::new(MemoryStore::new()));
    let mut first = store.subscribe();
    let mut second = store.subscribe();

    let mut settings = store.current().clone();
    settings.auto_capture = false;
    store.save(settings.clone());

    assert_eq!(first.recv().await.unwrap(), settings);
    assert_eq!(second.recv().await.unwrap(), settings);
}

#[tokio::test]
async fn test_newly_added_prefix_is_captured() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let mut panel = Panel::open(kv.clone(), 100);
    let exchange = || {
        Exchange::ready(
            ExchangeRequest {
                url: "https://api.example.com/cubejs-api/v1/load".to_string(),
                method: "POST".to_string(),
                post_data: Some(r#"{"measures":["Orders.count"]}"#.to_string()),
            },
            200,
            None,
            r#"{"results":[]}"#,
        )
    };

    assert!(capture(&mut panel, exchange()).await.is_none());

    // Edited from another surface sharing the same storage
    let mut options = SettingsStore::open(kv);
    let mut settings = options.current().clone();
    settings.add_url("https://api.example.com/cubejs-api/v1");
    options.save(settings);

    assert!(capture(&mut panel, exchange()).await.is_some());
}
