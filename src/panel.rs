use std::sync::Arc;

use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::capture::exchange::Exchange;
use crate::capture::model::CapturedRequest;
use crate::capture::recorder::{Recorder, Timeline};
use crate::store::kv::{KeyValueStore, StorageChange};
use crate::store::pins::{PINNED_REQUESTS_STORAGE_KEY, PinStore, merge_for_display};
use crate::store::settings::{SETTINGS_STORAGE_KEY, Settings, SettingsStore};
use crate::view::formatter::matches_filter;

/// 过滤后的展示列表
#[derive(Debug)]
pub struct VisibleRequests<'a> {
    pub pinned: Vec<&'a CapturedRequest>,
    pub requests: Vec<&'a CapturedRequest>,
    /// Size of the merged list before filtering.
    pub total: usize,
}

impl<'a> VisibleRequests<'a> {
    pub fn len(&self) -> usize {
        self.pinned.len() + self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pinned entries first, then the rest.
    pub fn iter(&self) -> impl Iterator<Item = &'a CapturedRequest> + '_ {
        self.pinned.iter().chain(self.requests.iter()).copied()
    }
}

/// 面板状态: 把记录器、固定集合与设置串在一起
///
/// 所有修改都发生在调用方的单个逻辑线程上。
pub struct Panel {
    store: Arc<dyn KeyValueStore>,
    recorder: Recorder,
    pins: PinStore,
    settings: SettingsStore,
    storage_changes: broadcast::Receiver<StorageChange>,
    filter: String,
    selected: Option<String>,
}

impl Panel {
    pub fn open(store: Arc<dyn KeyValueStore>, timeline_capacity: usize) -> Self {
        let storage_changes = store.subscribe();
        let settings = SettingsStore::open(store.clone());
        let pins = PinStore::open(store.clone());
        info!(
            "Panel ready: {} monitored URL(s), {} pinned request(s)",
            settings.current().urls.len(),
            pins.pinned().len()
        );

        Self {
            store,
            recorder: Recorder::new(timeline_capacity),
            pins,
            settings,
            storage_changes,
            filter: String::new(),
            selected: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        self.settings.current()
    }

    pub fn settings_store(&mut self) -> &mut SettingsStore {
        &mut self.settings
    }

    pub fn pins(&self) -> &PinStore {
        &self.pins
    }

    pub fn timeline(&self) -> &Timeline {
        self.recorder.timeline()
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// 处理宿主投递的一次网络交互
    ///
    /// 不等待响应 body; 匹配时返回 true, 记录在 body 到达后由
    /// `collect_captured` / `next_captured` 写入时间线。
    pub fn on_exchange(&mut self, exchange: Exchange) -> bool {
        self.sync_storage();
        if !self.settings.current().auto_capture {
            debug!("Auto capture disabled, ignoring {}", exchange.request.url);
            return false;
        }
        self.recorder
            .observe(exchange, &self.settings.current().urls)
    }

    /// Moves every already completed capture into the timeline.
    pub fn collect_captured(&mut self) -> Vec<CapturedRequest> {
        self.recorder.collect_completed()
    }

    /// Waits for the next completed capture; `None` when nothing is in flight.
    pub async fn next_captured(&mut self) -> Option<CapturedRequest> {
        self.recorder.next_completed().await
    }

    pub fn in_flight(&self) -> usize {
        self.recorder.in_flight()
    }

    pub fn on_filter_change(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
    }

    /// Selects a request by id, or clears the selection with `None`.
    pub fn on_request_select(&mut self, id: Option<&str>) -> Option<&CapturedRequest> {
        self.selected = id.map(str::to_string);
        self.selected()
    }

    pub fn selected(&self) -> Option<&CapturedRequest> {
        self.selected.as_deref().and_then(|id| self.find(id))
    }

    /// 切换固定状态, 返回切换后是否处于固定状态; 找不到该请求时返回 None
    pub fn on_toggle_pin(&mut self, id: &str) -> Option<bool> {
        let request = self.find(id)?.clone();
        self.pins.toggle_pin(&request);
        Some(self.pins.is_pinned(id))
    }

    /// Empties the timeline; pinned requests are kept.
    pub fn on_clear_timeline(&mut self) {
        self.recorder.clear();
        self.selected = None;
    }

    /// 固定的请求优先, 其次是时间线中的请求
    pub fn find(&self, id: &str) -> Option<&CapturedRequest> {
        self.pins
            .get(id)
            .or_else(|| self.recorder.timeline().get(id))
    }

    /// Merged list without the text filter applied.
    pub fn presented(&self) -> Vec<&CapturedRequest> {
        merge_for_display(self.pins.pinned(), self.recorder.timeline().iter())
    }

    /// Merged list split into pinned and non-pinned parts, text filter applied.
    pub fn visible(&self) -> VisibleRequests<'_> {
        let presented = self.presented();
        let total = presented.len();
        let pinned_count = self.pins.pinned().len();

        let (pinned, requests): (Vec<_>, Vec<_>) = presented
            .into_iter()
            .enumerate()
            .filter(|(_, r)| matches_filter(r, &self.filter))
            .partition(|(i, _)| *i < pinned_count);

        VisibleRequests {
            pinned: pinned.into_iter().map(|(_, r)| r).collect(),
            requests: requests.into_iter().map(|(_, r)| r).collect(),
            total,
        }
    }

    /// 处理其他界面写入存储产生的变化, 返回处理的变化数
    pub fn sync_storage(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.storage_changes.try_recv() {
                Ok(change) => {
                    self.apply_change(&change);
                    applied += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Missed {} storage change(s), reloading", skipped);
                    self.reload_from_storage();
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        applied
    }

    fn apply_change(&mut self, change: &StorageChange) {
        if self.settings.apply_storage_change(change).is_some() {
            debug!("Settings updated from storage");
        }
        if self.pins.apply_storage_change(change) {
            debug!("Pinned requests updated from storage");
        }
    }

    fn reload_from_storage(&mut self) {
        let keys = [SETTINGS_STORAGE_KEY, PINNED_REQUESTS_STORAGE_KEY];
        match self.store.get(&keys) {
            Ok(mut values) => {
                for key in keys {
                    let change = StorageChange {
                        key: key.to_string(),
                        new_value: values.remove(key),
                    };
                    self.apply_change(&change);
                }
            }
            Err(e) => warn!("Failed to reload from storage: {}", e),
        }
    }
}
