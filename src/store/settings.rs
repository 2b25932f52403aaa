use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::store::kv::{KeyValueStore, StorageChange};
use crate::{CubescopeError, Result};

/// 存储中的设置键
pub const SETTINGS_STORAGE_KEY: &str = "cubescopeSettings";
/// 当前设置的 schema 版本
pub const SETTINGS_VERSION: &str = "1";
/// 默认监控地址, 不可删除
pub const DEFAULT_URL: &str = "http://localhost:4000/cubejs-api/v1";

const SETTINGS_CHANNEL_CAPACITY: usize = 16;

/// 面板设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// 监控的 URL 前缀, 第一个为默认地址
    pub urls: Vec<String>,

    /// 是否自动捕获
    pub auto_capture: bool,

    /// schema 版本
    pub version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            urls: vec![DEFAULT_URL.to_string()],
            auto_capture: true,
            version: SETTINGS_VERSION.to_string(),
        }
    }
}

impl Settings {
    /// Builds settings from a stored value, field by field.
    ///
    /// Missing or malformed fields fall back to their defaults. A different
    /// `version` is kept as-is; no migration is applied.
    pub fn from_stored(value: &Value) -> Self {
        let mut settings = Settings::default();
        let Some(map) = value.as_object() else {
            warn!("Stored settings are not an object, using defaults");
            return settings;
        };

        if let Some(urls) = field::<Vec<String>>(map, "urls") {
            settings.urls = urls;
        }
        if let Some(auto_capture) = field::<bool>(map, "autoCapture") {
            settings.auto_capture = auto_capture;
        }
        if let Some(version) = field::<String>(map, "version") {
            if version != SETTINGS_VERSION {
                debug!(
                    "Settings version {} differs from {}, applying defaults only",
                    version, SETTINGS_VERSION
                );
            }
            settings.version = version;
        }

        settings.normalize();
        settings
    }

    /// Keeps exactly one copy of the default URL, at index 0.
    pub fn normalize(&mut self) {
        self.urls.retain(|u| u != DEFAULT_URL);
        self.urls.insert(0, DEFAULT_URL.to_string());
    }

    pub fn add_url(&mut self, url: impl Into<String>) {
        self.urls.push(url.into());
    }

    pub fn update_url(&mut self, index: usize, url: impl Into<String>) -> Result<()> {
        self.check_editable(index)?;
        self.urls[index] = url.into();
        Ok(())
    }

    /// Removes and returns the URL at `index`.
    pub fn remove_url(&mut self, index: usize) -> Result<String> {
        self.check_editable(index)?;
        Ok(self.urls.remove(index))
    }

    fn check_editable(&self, index: usize) -> Result<()> {
        if index >= self.urls.len() {
            return Err(CubescopeError::Settings(format!(
                "URL 索引 {} 超出范围 (共 {} 个)",
                index,
                self.urls.len()
            )));
        }
        if index == 0 {
            return Err(CubescopeError::Settings(format!(
                "默认地址 {} 不可修改",
                DEFAULT_URL
            )));
        }
        Ok(())
    }
}

fn field<T: serde::de::DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Option<T> {
    let value = map.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring malformed settings field '{}': {}", key, e);
            None
        }
    }
}

/// 设置存储, 变化通过 broadcast 通知所有订阅者
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
    current: Settings,
    changes: broadcast::Sender<Settings>,
}

impl SettingsStore {
    /// Opens the store and loads the current settings.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let (changes, _) = broadcast::channel(SETTINGS_CHANNEL_CAPACITY);
        let mut settings_store = Self {
            store,
            current: Settings::default(),
            changes,
        };
        settings_store.current = settings_store.load();
        settings_store
    }

    /// 读取设置, 缺失字段使用默认值
    pub fn load(&self) -> Settings {
        match self.store.get(&[SETTINGS_STORAGE_KEY]) {
            Ok(values) => values
                .get(SETTINGS_STORAGE_KEY)
                .map(Settings::from_stored)
                .unwrap_or_default(),
            Err(e) => {
                warn!("Failed to load settings: {}", e);
                Settings::default()
            }
        }
    }

    pub fn current(&self) -> &Settings {
        &self.current
    }

    /// 保存设置
    ///
    /// 这是一个 Best-effort 操作, 写入失败只打印警告。
    pub fn save(&mut self, settings: Settings) {
        let mut settings = settings;
        settings.normalize();

        match serde_json::to_value(&settings) {
            Ok(value) => {
                let mut entries = Map::new();
                entries.insert(SETTINGS_STORAGE_KEY.to_string(), value);
                if let Err(e) = self.store.set(entries) {
                    warn!("Failed to save settings: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize settings: {}", e),
        }

        self.publish(settings);
    }

    /// Receiver for every settings change, local or external.
    pub fn subscribe(&self) -> broadcast::Receiver<Settings> {
        self.changes.subscribe()
    }

    /// Applies a storage change made elsewhere; returns the new settings if
    /// they changed.
    pub fn apply_storage_change(&mut self, change: &StorageChange) -> Option<Settings> {
        if change.key != SETTINGS_STORAGE_KEY {
            return None;
        }
        let settings = change
            .new_value
            .as_ref()
            .map(Settings::from_stored)
            .unwrap_or_default();

        if settings == self.current {
            return None;
        }
        self.publish(settings.clone());
        Some(settings)
    }

    fn publish(&mut self, settings: Settings) {
        if settings == self.current {
            return;
        }
        info!("Settings changed: {} monitored URL(s)", settings.urls.len());
        self.current = settings.clone();
        // No listeners is fine
        let _ = self.changes.send(settings);
    }
}
