use crate::Result;
use crate::error::CubescopeError;
use fs2::FileExt;
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;

const STORAGE_FILE: &str = "storage.json";
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A value written under `key`; `new_value` is `None` once the key is gone.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub new_value: Option<Value>,
}

/// 持久化键值存储
///
/// 不保证写后立即可读, 每次 `set` 会向所有订阅者广播变化。
pub trait KeyValueStore: Send + Sync {
    /// Values for the requested keys; absent keys are simply missing.
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>>;

    fn set(&self, entries: Map<String, Value>) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

fn broadcast_changes(sender: &broadcast::Sender<StorageChange>, entries: &Map<String, Value>) {
    for (key, value) in entries {
        // No subscribers is fine
        let _ = sender.send(StorageChange {
            key: key.clone(),
            new_value: Some(value.clone()),
        });
    }
}

/// In-memory store, lives as long as the process.
pub struct MemoryStore {
    values: Mutex<Map<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: Mutex::new(Map::new()),
            changes,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        let values = self
            .values
            .lock()
            .map_err(|e| CubescopeError::Storage(e.to_string()))?;
        Ok(keys
            .iter()
            .filter_map(|k| values.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn set(&self, entries: Map<String, Value>) -> Result<()> {
        {
            let mut values = self
                .values
                .lock()
                .map_err(|e| CubescopeError::Storage(e.to_string()))?;
            for (key, value) in &entries {
                values.insert(key.clone(), value.clone());
            }
        }
        broadcast_changes(&self.changes, &entries);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

/// 基于单个 JSON 文件的存储
pub struct FileStore {
    file_path: PathBuf,
    changes: broadcast::Sender<StorageChange>,
}

impl FileStore {
    /// `<dir>/storage.json`
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::new_with_path(dir.as_ref().join(STORAGE_FILE))
    }

    /// Create with specific path (internal/testing use)
    pub fn new_with_path(path: PathBuf) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            file_path: path,
            changes,
        }
    }

    /// Ensure directory exists
    fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.file_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(CubescopeError::IoError)?;
        }
        Ok(())
    }

    fn parse_document(content: &str) -> Result<Map<String, Value>> {
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(content)? {
            Value::Object(map) => Ok(map),
            _ => Err(CubescopeError::Storage(
                "storage document is not a JSON object".to_string(),
            )),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        if !self.file_path.exists() {
            return Ok(Map::new());
        }

        let mut file = fs::File::open(&self.file_path).map_err(CubescopeError::IoError)?;
        // Shared lock so we never read a half-written document
        file.lock_shared().map_err(CubescopeError::IoError)?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(CubescopeError::IoError)?;
        drop(file);

        let mut document = Self::parse_document(&content)?;
        Ok(keys
            .iter()
            .filter_map(|k| document.remove(*k).map(|v| (k.to_string(), v)))
            .collect())
    }

    /// Read-modify-write under an exclusive lock.
    ///
    /// The file is truncated and rewritten through the same handle so the
    /// lock stays valid for the whole update.
    fn set(&self, entries: Map<String, Value>) -> Result<()> {
        self.ensure_dir()?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.file_path)
            .map_err(CubescopeError::IoError)?;

        file.lock_exclusive().map_err(CubescopeError::IoError)?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(CubescopeError::IoError)?;
        let mut document = Self::parse_document(&content)?;
        for (key, value) in &entries {
            document.insert(key.clone(), value.clone());
        }

        let json = serde_json::to_string_pretty(&Value::Object(document))?;
        file.set_len(0).map_err(CubescopeError::IoError)?;
        file.seek(SeekFrom::Start(0))
            .map_err(CubescopeError::IoError)?;
        file.write_all(json.as_bytes())
            .map_err(CubescopeError::IoError)?;
        file.flush().map_err(CubescopeError::IoError)?;
        // Unlock on drop
        drop(file);

        broadcast_changes(&self.changes, &entries);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entries(key: &str, value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        map
    }

    #[test]
    fn test_memory_store_get_set() {
        let store = MemoryStore::new();
        store.set(entries("a", json!(1))).unwrap();
        store.set(entries("b", json!({"x": true}))).unwrap();

        let values = store.get(&["a", "b", "missing"]).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["a"], json!(1));
        assert_eq!(values["b"], json!({"x": true}));
    }

    #[test]
    fn test_memory_store_broadcasts() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store.set(entries("a", json!("v"))).unwrap();

        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, "a");
        assert_eq!(change.new_value, Some(json!("v")));
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::in_dir(temp_dir.path().join("nested"));
        assert!(store.get(&["a"]).unwrap().is_empty());
    }

    #[test]
    fn test_file_store_merges_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::in_dir(temp_dir.path().join("nested"));

        store.set(entries("a", json!([1, 2]))).unwrap();
        store.set(entries("b", json!("two"))).unwrap();
        store.set(entries("a", json!([3]))).unwrap();

        let reopened = FileStore::in_dir(temp_dir.path().join("nested"));
        let values = reopened.get(&["a", "b"]).unwrap();
        assert_eq!(values["a"], json!([3]));
        assert_eq!(values["b"], json!("two"));
    }

    #[test]
    fn test_file_store_rejects_non_object_document() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("storage.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let store = FileStore::new_with_path(path);
        assert!(matches!(
            store.get(&["a"]),
            Err(CubescopeError::Storage(_))
        ));
    }
}
