pub mod kv;
pub mod pins;
pub mod settings;

// Re-export commonly used types for convenient access
pub use kv::{FileStore, KeyValueStore, MemoryStore, StorageChange};
pub use pins::{PinStore, merge_for_display};
pub use settings::{Settings, SettingsStore};
