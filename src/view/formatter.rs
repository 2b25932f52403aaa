use serde_json::{Map, Value};

use crate::capture::model::{Annotation, CapturedRequest, Filter, Query, UnaryOperator};

/// 结果表每页行数
pub const ITEMS_PER_PAGE: usize = 15;

/// 空单元格的显示
pub const EMPTY_CELL: &str = "—";

/// 运算符显示符号, 未知运算符原样显示
pub fn operator_symbol(operator: &str) -> &str {
    match operator {
        "equals" => "=",
        "notEquals" => "≠",
        "contains" => "∋",
        "notContains" => "∌",
        "startsWith" => "^=",
        "notStartsWith" => "^≠",
        "endsWith" => "$=",
        "notEndsWith" => "$≠",
        "gt" | "afterDate" => ">",
        "gte" | "afterOrOnDate" => "≥",
        "lt" | "beforeDate" => "<",
        "lte" | "beforeOrOnDate" => "≤",
        "inDateRange" => "∈",
        "notInDateRange" => "∉",
        other => other,
    }
}

/// 过滤值列表: 最多显示三个, 其余折叠为 `... +N`
pub fn format_filter_values(values: &[String]) -> String {
    match values.len() {
        0 => "empty".to_string(),
        1 => values[0].clone(),
        2..=3 => values.join(", "),
        n => format!("{}... +{}", values[..3].join(", "), n - 3),
    }
}

enum Piece<'a> {
    Filter(&'a Filter),
    Text(&'static str),
}

/// 把一个过滤条件渲染为单行文本
///
/// 逻辑组用显式栈展开, 嵌套深度不受调用栈限制。
pub fn render_filter(filter: &Filter) -> String {
    let mut out = String::new();
    let mut stack = vec![Piece::Filter(filter)];

    while let Some(piece) = stack.pop() {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Filter(Filter::And { and }) => push_group(&mut stack, "AND (", " & ", and),
            Piece::Filter(Filter::Or { or }) => push_group(&mut stack, "OR (", " | ", or),
            Piece::Filter(Filter::Unary { member, operator }) => {
                let verb = match operator {
                    UnaryOperator::Set => "is set",
                    UnaryOperator::NotSet => "is not set",
                };
                out.push_str(&format!("{} {}", member, verb));
            }
            Piece::Filter(Filter::Binary {
                member,
                operator,
                values,
            }) => {
                out.push_str(&format!(
                    "{} {} {}",
                    member,
                    operator_symbol(operator),
                    format_filter_values(values)
                ));
            }
        }
    }

    out
}

fn push_group<'a>(
    stack: &mut Vec<Piece<'a>>,
    open: &'static str,
    separator: &'static str,
    children: &'a [Filter],
) {
    stack.push(Piece::Text(")"));
    for (i, child) in children.iter().enumerate().rev() {
        stack.push(Piece::Filter(child));
        if i > 0 {
            stack.push(Piece::Text(separator));
        }
    }
    stack.push(Piece::Text(open));
}

/// 自由文本过滤: 查询 JSON 文本 (忽略大小写) 包含关键字即匹配
pub fn matches_filter(request: &CapturedRequest, filter: &str) -> bool {
    if filter.is_empty() {
        return true;
    }
    request
        .query
        .to_json_string()
        .to_lowercase()
        .contains(&filter.to_lowercase())
}

/// Distinct cube names referenced by measures and dimensions, first seen first.
pub fn cube_names(query: &Query) -> Vec<String> {
    let mut cubes: Vec<String> = Vec::new();
    for member in query.measures().iter().chain(query.dimensions()) {
        let cube = member.split('.').next().unwrap_or_default();
        if !cube.is_empty() && !cubes.iter().any(|c| c == cube) {
            cubes.push(cube.to_string());
        }
    }
    cubes
}

/// 列表中每个请求的摘要徽章
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySummary {
    pub cubes: Vec<String>,
    pub measures: usize,
    pub dimensions: usize,
    pub filters: usize,
}

impl QuerySummary {
    pub fn of(query: &Query) -> Self {
        Self {
            cubes: cube_names(query),
            measures: query.measures().len(),
            dimensions: query.dimensions().len(),
            filters: query.filters().len(),
        }
    }

    /// e.g. `2 cubes: Orders, Users · 1 measure · 2 dimensions`
    pub fn badges(&self) -> String {
        let mut parts = Vec::new();
        if !self.cubes.is_empty() {
            parts.push(format!(
                "{}: {}",
                plural(self.cubes.len(), "cube"),
                self.cubes.join(", ")
            ));
        }
        for (count, noun) in [
            (self.measures, "measure"),
            (self.dimensions, "dimension"),
            (self.filters, "filter"),
        ] {
            if count > 0 {
                parts.push(plural(count, noun));
            }
        }
        parts.join(" · ")
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

/// 结果表的列: 取第一行的键, 保持服务端顺序
pub fn column_keys(rows: &[Map<String, Value>]) -> Vec<String> {
    rows.first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

/// 列标题: 优先使用注解中的 shortTitle, 否则取成员名最后一段并按 `_` 分词首字母大写
pub fn column_title(key: &str, annotation: Option<&Annotation>) -> String {
    if let Some(short_title) = annotation
        .and_then(|a| a.member(key))
        .and_then(|m| m.short_title.as_deref())
        .filter(|t| !t.is_empty())
    {
        return short_title.to_string();
    }

    let last = key.rsplit('.').next().unwrap_or(key);
    last.split('_')
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn format_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => EMPTY_CELL.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn page_count(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}

/// Rows of page `index` (0-based); empty past the last page.
pub fn page<T>(rows: &[T], index: usize, page_size: usize) -> &[T] {
    let start = index.saturating_mul(page_size).min(rows.len());
    let end = start.saturating_add(page_size).min(rows.len());
    &rows[start..end]
}
