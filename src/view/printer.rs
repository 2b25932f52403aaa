use chrono::{Local, TimeZone};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, Table};

use crate::capture::model::{CapturedRequest, ResponseEnvelope, ResultSet};
use crate::view::formatter::{
    ITEMS_PER_PAGE, QuerySummary, column_keys, column_title, format_cell, page, page_count,
    render_filter,
};

/// Short display form of a request id.
fn short_id(id: &str) -> &str {
    id.get(..id.len().min(13)).unwrap_or(id)
}

fn format_time(timestamp: i64, pattern: &str) -> String {
    Local
        .timestamp_millis_opt(timestamp)
        .single()
        .map(|t| t.format(pattern).to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn last_path_segment(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// 请求列表表格
pub fn request_table<F>(requests: &[&CapturedRequest], is_pinned: F) -> Table
where
    F: Fn(&str) -> bool,
{
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "", "ID", "Time", "Status", "Duration", "Query", "Endpoint",
    ]);

    for request in requests {
        let status_color = if request.is_error() || request.status >= 400 {
            Color::Red
        } else {
            Color::Green
        };
        let status = if request.response.is_pending() {
            Cell::new("wait").fg(Color::Yellow)
        } else {
            Cell::new(request.status).fg(status_color)
        };
        let duration = request
            .duration
            .map(|d| format!("{}ms", d.round()))
            .unwrap_or_default();

        table.add_row(vec![
            Cell::new(if is_pinned(&request.id) { "📌" } else { "" }),
            Cell::new(short_id(&request.id)),
            Cell::new(format_time(request.timestamp, "%H:%M:%S")),
            status,
            Cell::new(duration),
            Cell::new(QuerySummary::of(&request.query).badges()),
            Cell::new(format!(
                "{} • {}",
                request.domain,
                last_path_segment(&request.url)
            ))
            .add_attribute(Attribute::Dim),
        ]);
    }

    table
}

/// 结果数据表格 (单页)
pub fn result_table(result: &ResultSet, page_index: usize) -> Table {
    let keys = column_keys(&result.data);
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(
        keys.iter()
            .map(|k| column_title(k, result.annotation.as_ref()))
            .collect::<Vec<_>>(),
    );

    for row in page(&result.data, page_index, ITEMS_PER_PAGE) {
        table.add_row(
            keys.iter()
                .map(|k| format_cell(row.get(k)))
                .collect::<Vec<_>>(),
        );
    }

    table
}

/// 请求详情的文本渲染
pub struct RequestPrinter {
    color: bool,
}

impl Default for RequestPrinter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RequestPrinter {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn heading(&self, text: &str) -> String {
        if self.color {
            text.blue().bold().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn format(&self, request: &CapturedRequest) -> String {
        let mut output = Vec::new();

        let mut header = format!(
            "{} • {}",
            format_time(request.timestamp, "%Y-%m-%d %H:%M:%S"),
            request.status
        );
        if let Some(duration) = request.duration {
            header.push_str(&format!(" • {}ms", duration.round()));
        }
        output.push(header);
        output.push(if self.color {
            request.url.dimmed().to_string()
        } else {
            request.url.clone()
        });

        self.format_query(request, &mut output);
        self.format_response(&request.response, &mut output);

        output.join("\n")
    }

    fn format_query(&self, request: &CapturedRequest, output: &mut Vec<String>) {
        let query = &request.query;
        for (title, items) in [
            ("Measures:", query.measures()),
            ("Dimensions:", query.dimensions()),
        ] {
            output.push(String::new());
            output.push(self.heading(title));
            if items.is_empty() {
                output.push("   (none)".to_string());
            }
            for item in items {
                output.push(format!("   {}", item));
            }
        }

        if !query.filters().is_empty() {
            output.push(String::new());
            output.push(self.heading("Filters:"));
            for filter in query.filters() {
                output.push(format!("   {}", render_filter(filter)));
            }
        }

        if !query.time_dimensions().is_empty() {
            output.push(String::new());
            output.push(self.heading("Time Dimensions:"));
            output.push(pretty(query.time_dimensions()));
        }

        output.push(String::new());
        output.push(self.heading("Full Query:"));
        output.push(pretty(query));
    }

    fn format_response(&self, response: &ResponseEnvelope, output: &mut Vec<String>) {
        output.push(String::new());
        match response {
            ResponseEnvelope::Error(error) if response.is_pending() => {
                let title = "Query Still Processing";
                output.push(if self.color {
                    title.yellow().bold().to_string()
                } else {
                    title.to_string()
                });
                output.push(
                    "The Cube API returned \"Continue wait\"; retry the request to get the results."
                        .to_string(),
                );
                if let Some(request_id) = &error.request_id {
                    output.push(format!("Request ID: {}", request_id));
                }
            }
            ResponseEnvelope::Error(error) => {
                output.push(self.heading("Error message:"));
                output.push(if self.color {
                    error.error.red().to_string()
                } else {
                    error.error.clone()
                });
                if let Some(request_id) = &error.request_id {
                    output.push(format!("Request ID: {}", request_id));
                }
            }
            ResponseEnvelope::Success(_) => {
                output.push(self.heading("Data:"));
                let Some(result) = response.results().first() else {
                    output.push("   (no rows)".to_string());
                    return;
                };
                if result.data.is_empty() {
                    output.push("   (no rows)".to_string());
                    return;
                }
                output.push(result_table(result, 0).to_string());
                let pages = page_count(result.data.len(), ITEMS_PER_PAGE);
                if pages > 1 {
                    output.push(format!(
                        "Page 1 of {} ({} rows)",
                        pages,
                        result.data.len()
                    ));
                }
            }
        }
    }
}

fn pretty<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}
