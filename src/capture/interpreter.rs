use serde_json::{Map, Value};

use crate::capture::model::{ErrorResponse, LoadResponse, ResponseEnvelope};
use crate::{CubescopeError, Result};

/// 旧版 load 响应中直接挂在顶层的结果集字段
const LEGACY_RESULT_FIELDS: [&str; 2] = ["data", "annotation"];

/// 将响应 body 解析为响应信封
///
/// body 不是合法 JSON 对象时返回错误, 调用方应丢弃此次交互。
/// 带 `error` 字段的响应 (包括 "Continue wait") 属于正常结果。
pub fn interpret_response(status_code: u16, body: &str) -> Result<ResponseEnvelope> {
    let value: Value = serde_json::from_str(body)?;

    let Value::Object(mut map) = value else {
        return Err(CubescopeError::InvalidResponse(format!(
            "HTTP {} body is not a JSON object",
            status_code
        )));
    };

    // Any `error` key, null included, makes this an error response.
    if let Some(error) = map.remove("error") {
        return Ok(ResponseEnvelope::Error(ErrorResponse {
            error: error_message(error),
            request_id: map.get("requestId").and_then(request_id),
        }));
    }

    if !map.contains_key("results") && map.contains_key("data") {
        normalize_legacy(&mut map);
    }

    let load: LoadResponse = serde_json::from_value(Value::Object(map)).map_err(|e| {
        CubescopeError::InvalidResponse(format!("HTTP {} load response: {}", status_code, e))
    })?;

    Ok(ResponseEnvelope::Success(load))
}

fn error_message(error: Value) -> String {
    match error {
        Value::String(message) => message,
        other => other.to_string(),
    }
}

fn request_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// `{data, annotation, ...}` -> `{results: [{data, annotation}], ...}`
fn normalize_legacy(map: &mut Map<String, Value>) {
    let mut result_set = Map::new();
    for field in LEGACY_RESULT_FIELDS {
        if let Some(value) = map.remove(field) {
            result_set.insert(field.to_string(), value);
        }
    }
    map.insert(
        "results".to_string(),
        Value::Array(vec![Value::Object(result_set)]),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::model::CONTINUE_WAIT;
    use serde_json::json;

    #[test]
    fn test_success_with_results() {
        let body = json!({
            "queryType": "regularQuery",
            "results": [{
                "query": {"measures": ["Orders.count"]},
                "data": [{"Orders.count": "150"}],
                "annotation": {
                    "measures": {
                        "Orders.count": {
                            "title": "Orders Count",
                            "shortTitle": "Count",
                            "type": "number",
                            "drillMembers": ["Orders.id"]
                        }
                    },
                    "dimensions": {},
                    "segments": {},
                    "timeDimensions": {}
                }
            }],
            "slowQuery": false
        })
        .to_string();

        let envelope = interpret_response(200, &body).unwrap();
        let ResponseEnvelope::Success(load) = &envelope else {
            panic!("Expected success envelope");
        };
        assert_eq!(load.query_type.as_deref(), Some("regularQuery"));
        assert_eq!(load.slow_query, Some(false));

        let result = envelope.results().first().unwrap();
        assert_eq!(result.data.len(), 1);
        let count = &result.annotation.as_ref().unwrap().measures["Orders.count"];
        assert_eq!(count.drill_members.as_deref(), Some(&["Orders.id".to_string()][..]));
        assert!(result.extra.contains_key("query"));
    }

    #[test]
    fn test_legacy_top_level_data() {
        let body = r#"{"data":[{"Orders.status":"completed","Orders.count":150}]}"#;
        let envelope = interpret_response(200, body).unwrap();

        assert!(!envelope.is_error());
        assert_eq!(envelope.results().len(), 1);
        assert_eq!(
            envelope.results()[0].data[0].get("Orders.count"),
            Some(&json!(150))
        );
    }

    #[test]
    fn test_missing_or_empty_results_is_zero_rows() {
        let envelope = interpret_response(200, "{}").unwrap();
        assert!(!envelope.is_error());
        assert_eq!(envelope.row_count(), 0);

        let envelope = interpret_response(200, r#"{"results":[]}"#).unwrap();
        assert_eq!(envelope.row_count(), 0);
    }

    #[test]
    fn test_continue_wait() {
        let envelope =
            interpret_response(200, r#"{"error":"Continue wait","requestId":"abc"}"#).unwrap();

        assert!(envelope.is_pending());
        assert_eq!(envelope.error_message(), Some(CONTINUE_WAIT));
        let ResponseEnvelope::Error(error) = envelope else {
            panic!("Expected error envelope");
        };
        assert_eq!(error.request_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_generic_error_is_not_pending() {
        let envelope = interpret_response(200, r#"{"error":"Cube not found: Foo"}"#).unwrap();
        assert!(envelope.is_error());
        assert!(!envelope.is_pending());
        assert_eq!(envelope.error_message(), Some("Cube not found: Foo"));
    }

    #[test]
    fn test_structured_error_is_stringified() {
        let envelope = interpret_response(200, r#"{"error":{"code":42}}"#).unwrap();
        assert_eq!(envelope.error_message(), Some(r#"{"code":42}"#));
    }

    #[test]
    fn test_null_error_is_still_an_error() {
        let envelope = interpret_response(200, r#"{"error":null,"results":[]}"#).unwrap();
        assert!(envelope.is_error());
        assert!(!envelope.is_pending());
        assert_eq!(envelope.error_message(), Some("null"));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(matches!(
            interpret_response(200, "not json"),
            Err(CubescopeError::JsonError(_))
        ));
        assert!(matches!(
            interpret_response(200, "[1,2]"),
            Err(CubescopeError::InvalidResponse(_))
        ));
        assert!(matches!(
            interpret_response(200, r#"{"results": "nope"}"#),
            Err(CubescopeError::InvalidResponse(_))
        ));
    }
}
