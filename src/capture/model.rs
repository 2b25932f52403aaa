use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Cube 在查询尚未计算完成时返回的错误消息
pub const CONTINUE_WAIT: &str = "Continue wait";

/// 捕获到的请求 (创建后不可变)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    /// 唯一 ID (时间戳 + 随机数)
    pub id: String,

    /// 完整请求 URL
    pub url: String,

    /// host:port, 端口按 scheme 补全
    pub domain: String,

    /// 解析出的查询, 解析失败时为空查询
    pub query: Query,

    /// 响应信封
    pub response: ResponseEnvelope,

    /// 捕获时间 (epoch 毫秒)
    pub timestamp: i64,

    /// 请求耗时 (毫秒)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// HTTP 状态码
    pub status: u16,
}

impl CapturedRequest {
    pub fn is_error(&self) -> bool {
        self.response.is_error()
    }
}

/// Cube 查询对象
///
/// 只对常用字段做强类型解析, 其余字段原样保存在 `extra` 中。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measures: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_dimensions: Option<Vec<Value>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Never fails: anything that is not an object becomes the empty query.
impl<'de> Deserialize<'de> for Query {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Query::from_value(value).unwrap_or_default())
    }
}

impl Query {
    /// Build a query from an already unwrapped JSON value.
    ///
    /// Returns `None` for anything that is not a JSON object. Each well-known
    /// field is decoded on its own; a field with an unexpected shape stays
    /// verbatim in `extra` and the others are still typed.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut extra) = value else {
            return None;
        };

        Some(Query {
            measures: take_field(&mut extra, "measures"),
            dimensions: take_field(&mut extra, "dimensions"),
            segments: take_field(&mut extra, "segments"),
            filters: take_field(&mut extra, "filters"),
            time_dimensions: take_field(&mut extra, "timeDimensions"),
            extra,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_none()
            && self.dimensions.is_none()
            && self.segments.is_none()
            && self.filters.is_none()
            && self.time_dimensions.is_none()
            && self.extra.is_empty()
    }

    pub fn measures(&self) -> &[String] {
        self.measures.as_deref().unwrap_or_default()
    }

    pub fn dimensions(&self) -> &[String] {
        self.dimensions.as_deref().unwrap_or_default()
    }

    pub fn filters(&self) -> &[Filter] {
        self.filters.as_deref().unwrap_or_default()
    }

    pub fn time_dimensions(&self) -> &[Value] {
        self.time_dimensions.as_deref().unwrap_or_default()
    }

    /// JSON 文本形式, 用于自由文本过滤
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Removes `key` from `map` if it decodes as `T`; otherwise leaves it in place.
fn take_field<T: DeserializeOwned>(map: &mut Map<String, Value>, key: &str) -> Option<T> {
    let value = map.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(typed) => {
            map.remove(key);
            Some(typed)
        }
        Err(e) => {
            tracing::debug!("Keeping query field '{}' raw: {}", key, e);
            None
        }
    }
}

/// 过滤条件 (可递归嵌套)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    And {
        and: Vec<Filter>,
    },
    Or {
        or: Vec<Filter>,
    },
    Unary {
        #[serde(alias = "dimension")]
        member: String,
        operator: UnaryOperator,
    },
    Binary {
        #[serde(alias = "dimension")]
        member: String,
        operator: String,
        #[serde(default)]
        values: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnaryOperator {
    Set,
    NotSet,
}

/// 响应信封: 成功结果或错误 (包括 "Continue wait")
///
/// 序列化后没有 `error` 字段即为成功。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
    Error(ErrorResponse),
    Success(LoadResponse),
}

impl ResponseEnvelope {
    pub fn is_error(&self) -> bool {
        matches!(self, ResponseEnvelope::Error(_))
    }

    /// Query is still being computed server-side.
    pub fn is_pending(&self) -> bool {
        matches!(self, ResponseEnvelope::Error(e) if e.error == CONTINUE_WAIT)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ResponseEnvelope::Error(e) => Some(&e.error),
            ResponseEnvelope::Success(_) => None,
        }
    }

    pub fn results(&self) -> &[ResultSet] {
        match self {
            ResponseEnvelope::Success(load) => &load.results,
            ResponseEnvelope::Error(_) => &[],
        }
    }

    pub fn row_count(&self) -> usize {
        self.results().iter().map(|r| r.data.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// 成功的 load 响应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResponse {
    #[serde(default)]
    pub results: Vec<ResultSet>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivot_query: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow_query: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 单个结果集
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    #[serde(default)]
    pub data: Vec<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<Annotation>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 字段元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Annotation {
    pub measures: BTreeMap<String, MemberAnnotation>,
    pub dimensions: BTreeMap<String, MemberAnnotation>,
    pub segments: Map<String, Value>,
    pub time_dimensions: Map<String, Value>,
}

impl Annotation {
    /// Looks up a column in dimensions first, then measures.
    pub fn member(&self, key: &str) -> Option<&MemberAnnotation> {
        self.dimensions.get(key).or_else(|| self.measures.get(key))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemberAnnotation {
    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_title: Option<String>,

    #[serde(rename = "type")]
    pub member_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub drill_members: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub drill_members_grouped: Option<DrillMembersGrouped>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrillMembersGrouped {
    pub measures: Vec<String>,
    pub dimensions: Vec<String>,
}
