use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Request half of an observed exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
}

/// Pending response body of an exchange.
///
/// The host resolves it at some later point; if the sending side is dropped
/// the body never arrives and the exchange produces no record.
pub struct ContentHandle(oneshot::Receiver<String>);

impl ContentHandle {
    pub fn pending() -> (oneshot::Sender<String>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self(rx))
    }

    pub fn ready(body: impl Into<String>) -> Self {
        let (tx, handle) = Self::pending();
        // The receiver is alive, send cannot fail here.
        let _ = tx.send(body.into());
        handle
    }

    /// Waits for the body; `None` if the host gave up on it.
    pub async fn content(self) -> Option<String> {
        self.0.await.ok()
    }
}

/// 一次完整的网络交互 (请求 + 响应)
pub struct Exchange {
    pub request: ExchangeRequest,
    pub status: u16,
    /// 网络耗时 (毫秒)
    pub time: Option<f64>,
    pub content: ContentHandle,
}

impl Exchange {
    /// Exchange whose body is already available.
    pub fn ready(
        request: ExchangeRequest,
        status: u16,
        time: Option<f64>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            request,
            status,
            time,
            content: ContentHandle::ready(body),
        }
    }

    /// Exchange whose body is delivered later through the returned sender.
    pub fn pending(
        request: ExchangeRequest,
        status: u16,
        time: Option<f64>,
    ) -> (Self, oneshot::Sender<String>) {
        let (tx, content) = ContentHandle::pending();
        (
            Self {
                request,
                status,
                time,
                content,
            },
            tx,
        )
    }
}

/// Serialized exchange, one per line in a replay file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRecord {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(default)]
    pub content: String,
}

fn default_method() -> String {
    "GET".to_string()
}

impl From<ExchangeRecord> for Exchange {
    fn from(record: ExchangeRecord) -> Self {
        Exchange::ready(
            ExchangeRequest {
                url: record.url,
                method: record.method,
                post_data: record.post_data,
            },
            record.status,
            record.time,
            record.content,
        )
    }
}
