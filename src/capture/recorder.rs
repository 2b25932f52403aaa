use std::collections::VecDeque;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::capture::classifier::classify;
use crate::capture::exchange::{Exchange, ExchangeRequest};
use crate::capture::extractor::extract_query;
use crate::capture::interpreter::interpret_response;
use crate::capture::model::CapturedRequest;
use crate::{CubescopeError, Result};

/// Keep the newest 100 captured requests
pub const DEFAULT_TIMELINE_CAPACITY: usize = 100;

/// 会话内的捕获时间线 (最新的在前, 超出容量时丢弃最旧的)
#[derive(Debug, Clone)]
pub struct Timeline {
    entries: VecDeque<CapturedRequest>,
    capacity: usize,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TIMELINE_CAPACITY)
    }
}

impl Timeline {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Prepends `request`, evicting from the tail when over capacity.
    pub fn push(&mut self, request: CapturedRequest) {
        self.entries.push_front(request);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                trace!("Evicted {} from timeline", evicted.id);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&CapturedRequest> {
        self.entries.iter().find(|r| r.id == id)
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &CapturedRequest> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// 请求记录器: 分类 -> 提取查询 -> 解析响应 -> 组装记录
///
/// 每个匹配的交互在独立任务中等待响应 body, 完成后经 channel 交回,
/// 因此时间线顺序是 body 读取完成的顺序, 不是交互到达的顺序。
/// 一直不返回的 body 只会让那一个交互停住。
#[derive(Debug)]
pub struct Recorder {
    timeline: Timeline,
    completed_tx: mpsc::UnboundedSender<Option<CapturedRequest>>,
    completed_rx: mpsc::UnboundedReceiver<Option<CapturedRequest>>,
    in_flight: usize,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(DEFAULT_TIMELINE_CAPACITY)
    }
}

impl Recorder {
    pub fn new(capacity: usize) -> Self {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        Self {
            timeline: Timeline::with_capacity(capacity),
            completed_tx,
            completed_rx,
            in_flight: 0,
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Matched exchanges whose body has not been handed back yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn clear(&mut self) {
        self.timeline.clear();
    }

    /// 观察一次交互, 匹配时在后台等待 body 并返回 true
    ///
    /// Must be called from within a tokio runtime.
    pub fn observe<S: AsRef<str>>(&mut self, exchange: Exchange, monitored_urls: &[S]) -> bool {
        if !classify(&exchange.request.url, exchange.status, monitored_urls) {
            return false;
        }

        let completed_tx = self.completed_tx.clone();
        tokio::spawn(async move {
            // The recorder may be gone already
            let _ = completed_tx.send(capture(exchange).await);
        });
        self.in_flight += 1;
        true
    }

    /// 把已完成的交互写入时间线, 不等待; 返回新记录 (按完成顺序)
    pub fn collect_completed(&mut self) -> Vec<CapturedRequest> {
        let mut recorded = Vec::new();
        while let Ok(completed) = self.completed_rx.try_recv() {
            if let Some(captured) = self.accept(completed) {
                recorded.push(captured);
            }
        }
        recorded
    }

    /// 等待下一个完成并成功组装的记录
    ///
    /// Returns `None` once nothing is in flight any more. Exchanges that are
    /// dropped along the way are skipped.
    pub async fn next_completed(&mut self) -> Option<CapturedRequest> {
        while self.in_flight > 0 {
            let completed = self.completed_rx.recv().await?;
            if let Some(captured) = self.accept(completed) {
                return Some(captured);
            }
        }
        None
    }

    fn accept(&mut self, completed: Option<CapturedRequest>) -> Option<CapturedRequest> {
        self.in_flight = self.in_flight.saturating_sub(1);
        let captured = completed?;
        self.timeline.push(captured.clone());
        Some(captured)
    }
}

/// 等待一次已匹配交互的 body 并组装记录
///
/// 不涉及时间线; body 没有到达或无法解析时返回 `None`。
pub async fn capture(exchange: Exchange) -> Option<CapturedRequest> {
    let Exchange {
        request,
        status,
        time,
        content,
    } = exchange;

    let Some(body) = content.content().await else {
        debug!("Response body never arrived for {}", request.url);
        return None;
    };

    match assemble(&request, status, time, &body) {
        Ok(captured) => {
            debug!(
                "Captured {} {} ({})",
                request.method, captured.url, captured.id
            );
            Some(captured)
        }
        Err(e) => {
            debug!("Failed to parse Cube request {}: {}", request.url, e);
            None
        }
    }
}

/// 由一次已匹配的交互构建记录
pub fn assemble(
    request: &ExchangeRequest,
    status: u16,
    time: Option<f64>,
    body: &str,
) -> Result<CapturedRequest> {
    let query = extract_query(&request.method, &request.url, request.post_data.as_deref());
    let response = interpret_response(status, body)?;
    let domain = derive_domain(&request.url)?;
    let timestamp = Utc::now().timestamp_millis();

    Ok(CapturedRequest {
        id: generate_id(timestamp),
        url: request.url.clone(),
        domain,
        query,
        response,
        timestamp,
        duration: time,
        status,
    })
}

/// `host:port`, 未写端口时 https 为 443, 其余为 80
pub fn derive_domain(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| CubescopeError::InvalidUrl(format!("{} has no host", url)))?;
    let port = parsed
        .port()
        .unwrap_or(if parsed.scheme() == "https" { 443 } else { 80 });
    Ok(format!("{}:{}", host, port))
}

fn generate_id(timestamp: i64) -> String {
    format!("{}-{:08x}", timestamp, rand::random::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::model::{Query, ResponseEnvelope};

    fn dummy_request(id: &str) -> CapturedRequest {
        CapturedRequest {
            id: id.to_string(),
            url: "http://localhost:4000/cubejs-api/v1/load".to_string(),
            domain: "localhost:4000".to_string(),
            query: Query::default(),
            response: ResponseEnvelope::Success(Default::default()),
            timestamp: 0,
            duration: None,
            status: 200,
        }
    }

    #[test]
    fn test_timeline_newest_first_and_bounded() {
        let mut timeline = Timeline::with_capacity(3);
        for i in 0..5 {
            timeline.push(dummy_request(&i.to_string()));
        }

        let ids: Vec<&str> = timeline.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "3", "2"]);
        assert!(timeline.get("1").is_none());
        assert!(timeline.get("2").is_some());
    }

    #[test]
    fn test_timeline_zero_capacity_keeps_one() {
        let mut timeline = Timeline::with_capacity(0);
        timeline.push(dummy_request("a"));
        timeline.push(dummy_request("b"));
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.iter().next().unwrap().id, "b");
    }

    #[test]
    fn test_derive_domain() {
        assert_eq!(
            derive_domain("https://api.example.com/cubejs-api/v1/load").unwrap(),
            "api.example.com:443"
        );
        assert_eq!(
            derive_domain("http://localhost/cubejs-api/v1/load").unwrap(),
            "localhost:80"
        );
        assert_eq!(
            derive_domain("http://localhost:4000/cubejs-api/v1/load").unwrap(),
            "localhost:4000"
        );
        assert_eq!(
            derive_domain("https://api.example.com:8443/x").unwrap(),
            "api.example.com:8443"
        );
        assert!(derive_domain("not a url").is_err());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(generate_id(1), generate_id(1));
    }

    #[test]
    fn test_assemble_rejects_bad_body() {
        let request = ExchangeRequest {
            url: "http://localhost:4000/cubejs-api/v1/load".to_string(),
            method: "POST".to_string(),
            post_data: Some(r#"{"measures":["Orders.count"]}"#.to_string()),
        };
        assert!(assemble(&request, 200, Some(12.0), "not json").is_err());

        let captured = assemble(&request, 200, Some(12.0), r#"{"results":[]}"#).unwrap();
        assert_eq!(captured.domain, "localhost:4000");
        assert_eq!(captured.duration, Some(12.0));
        assert_eq!(captured.query.measures(), ["Orders.count".to_string()]);
    }

    fn pending_exchange(measure: &str) -> (Exchange, tokio::sync::oneshot::Sender<String>) {
        Exchange::pending(
            ExchangeRequest {
                url: "http://localhost:4000/cubejs-api/v1/load".to_string(),
                method: "POST".to_string(),
                post_data: Some(format!(r#"{{"measures":["{}"]}}"#, measure)),
            },
            200,
            None,
        )
    }

    const MONITORED: [&str; 1] = ["http://localhost:4000/cubejs-api/v1"];

    #[tokio::test]
    async fn test_timeline_follows_completion_order() {
        let mut recorder = Recorder::new(10);
        let (first, first_tx) = pending_exchange("Orders.count");
        let (second, second_tx) = pending_exchange("Users.count");
        assert!(recorder.observe(first, &MONITORED));
        assert!(recorder.observe(second, &MONITORED));
        assert_eq!(recorder.in_flight(), 2);

        second_tx.send(r#"{"results":[]}"#.to_string()).unwrap();
        let done = recorder.next_completed().await.unwrap();
        assert_eq!(done.query.measures(), ["Users.count".to_string()]);

        first_tx.send(r#"{"results":[]}"#.to_string()).unwrap();
        let done = recorder.next_completed().await.unwrap();
        assert_eq!(done.query.measures(), ["Orders.count".to_string()]);

        let order: Vec<&str> = recorder
            .timeline()
            .iter()
            .map(|r| r.query.measures()[0].as_str())
            .collect();
        assert_eq!(order, vec!["Orders.count", "Users.count"]);
        assert_eq!(recorder.in_flight(), 0);
        assert!(recorder.next_completed().await.is_none());
    }

    #[tokio::test]
    async fn test_stalled_body_does_not_block_later_exchanges() {
        let mut recorder = Recorder::new(10);
        let (stalled, _stalled_tx) = pending_exchange("Orders.count");
        let (later, later_tx) = pending_exchange("Users.count");
        assert!(recorder.observe(stalled, &MONITORED));
        assert!(recorder.observe(later, &MONITORED));

        later_tx.send(r#"{"results":[]}"#.to_string()).unwrap();
        let done = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            recorder.next_completed(),
        )
        .await
        .expect("later exchange should not wait for the stalled one")
        .unwrap();

        assert_eq!(done.query.measures(), ["Users.count".to_string()]);
        assert_eq!(recorder.timeline().len(), 1);
        assert_eq!(recorder.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_exchange_is_not_observed() {
        let mut recorder = Recorder::new(10);
        let (exchange, _tx) = pending_exchange("Orders.count");
        assert!(!recorder.observe(exchange, &["https://elsewhere.example.com"]));
        assert_eq!(recorder.in_flight(), 0);
        assert!(recorder.collect_completed().is_empty());
    }
}
