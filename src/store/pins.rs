use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::capture::model::CapturedRequest;
use crate::store::kv::{KeyValueStore, StorageChange};

/// 存储中的固定请求键
pub const PINNED_REQUESTS_STORAGE_KEY: &str = "cubescopePinnedRequests";

/// 用户固定的请求集合 (完整快照, 与时间线生命周期无关)
pub struct PinStore {
    store: Arc<dyn KeyValueStore>,
    pinned: Vec<CapturedRequest>,
}

impl PinStore {
    /// Opens the store and loads the persisted pinned set.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let pinned = match store.get(&[PINNED_REQUESTS_STORAGE_KEY]) {
            Ok(mut values) => values
                .remove(PINNED_REQUESTS_STORAGE_KEY)
                .map(parse_pinned)
                .unwrap_or_default(),
            Err(e) => {
                warn!("Failed to load pinned requests: {}", e);
                Vec::new()
            }
        };
        Self { store, pinned }
    }

    /// Most recently pinned first.
    pub fn pinned(&self) -> &[CapturedRequest] {
        &self.pinned
    }

    pub fn is_pinned(&self, id: &str) -> bool {
        self.pinned.iter().any(|r| r.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&CapturedRequest> {
        self.pinned.iter().find(|r| r.id == id)
    }

    /// 切换固定状态并返回新的固定集合
    ///
    /// 已固定则移除, 否则把快照插到最前面。持久化是 best-effort 的。
    pub fn toggle_pin(&mut self, request: &CapturedRequest) -> &[CapturedRequest] {
        if self.is_pinned(&request.id) {
            self.pinned.retain(|r| r.id != request.id);
        } else {
            self.pinned.insert(0, request.clone());
        }
        self.persist();
        &self.pinned
    }

    /// Applies a storage change made elsewhere; returns true if the pinned
    /// set was replaced.
    pub fn apply_storage_change(&mut self, change: &StorageChange) -> bool {
        if change.key != PINNED_REQUESTS_STORAGE_KEY {
            return false;
        }
        let pinned = change
            .new_value
            .clone()
            .map(parse_pinned)
            .unwrap_or_default();
        if pinned == self.pinned {
            return false;
        }
        self.pinned = pinned;
        true
    }

    fn persist(&self) {
        let value = match serde_json::to_value(&self.pinned) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to serialize pinned requests: {}", e);
                return;
            }
        };
        let mut entries = Map::new();
        entries.insert(PINNED_REQUESTS_STORAGE_KEY.to_string(), value);
        if let Err(e) = self.store.set(entries) {
            warn!("Failed to save pinned requests: {}", e);
        }
    }
}

/// Entries that fail to parse are skipped, the rest are kept.
fn parse_pinned(value: Value) -> Vec<CapturedRequest> {
    let Value::Array(items) = value else {
        warn!("Stored pinned requests are not an array, ignoring");
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(request) => Some(request),
            Err(e) => {
                warn!("Skipping malformed pinned request: {}", e);
                None
            }
        })
        .collect()
}

/// 展示列表: 固定的请求在前 (固定顺序), 之后是未固定的时间线请求
pub fn merge_for_display<'a, I>(
    pinned: &'a [CapturedRequest],
    timeline: I,
) -> Vec<&'a CapturedRequest>
where
    I: IntoIterator<Item = &'a CapturedRequest>,
{
    let pinned_ids: HashSet<&str> = pinned.iter().map(|r| r.id.as_str()).collect();
    pinned
        .iter()
        .chain(
            timeline
                .into_iter()
                .filter(|r| !pinned_ids.contains(r.id.as_str())),
        )
        .collect()
}
