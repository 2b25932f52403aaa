use serde_json::Value;
use tracing::debug;

use crate::capture::model::Query;

/// URL 参数名 (GET 请求中携带查询)
const QUERY_PARAM: &str = "query";

/// 从一次交互中提取 Cube 查询
///
/// - 有非空 body 时 (不论方法) 只解析 body, URL 参数不会覆盖它
/// - 否则解析 URL 中的 `query` 参数
/// - 顶层含 `query` 字段时取其内部值
///
/// 任何解析失败都返回空查询, 不会向调用方报错。
pub fn extract_query(method: &str, url: &str, post_body: Option<&str>) -> Query {
    if let Some(body) = post_body.filter(|b| !b.is_empty()) {
        return parse_query_text(body).unwrap_or_else(|| {
            debug!("Failed to parse Cube query from request body: {} {}", method, url);
            Query::default()
        });
    }

    match query_param(url) {
        Some(text) => parse_query_text(&text).unwrap_or_else(|| {
            debug!("Failed to parse Cube query from URL parameter: {} {}", method, url);
            Query::default()
        }),
        None => Query::default(),
    }
}

/// 解析 JSON 文本并应用信封拆解规则
fn parse_query_text(text: &str) -> Option<Query> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!("Query text is not valid JSON: {}", e);
            return None;
        }
    };
    Query::from_value(unwrap_envelope(value))
}

fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key(QUERY_PARAM) => {
            map.remove(QUERY_PARAM).unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn query_param(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
}
