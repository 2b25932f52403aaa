use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{ArgAction, Parser, Subcommand};
use inquire::MultiSelect;
use tracing::warn;

use cubescope::Panel;
use cubescope::capture::model::CapturedRequest;
use cubescope::capture::ExchangeRecord;
use cubescope::config::{AppConfig, ConfigLoader};
use cubescope::store::{FileStore, KeyValueStore, PinStore, SettingsStore};
use cubescope::view::{RequestPrinter, request_table};

pub type Result<T> = std::result::Result<T, anyhow::Error>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// 配置文件路径 (默认自动查找 cubescope.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 回放 JSON Lines 格式的网络交互, 显示捕获到的 Cube 请求
    Replay {
        path: PathBuf,

        /// 只显示查询中包含该文本的请求
        #[arg(long)]
        filter: Option<String>,

        /// 交互式选择要固定/取消固定的请求
        #[arg(long)]
        pin: bool,

        /// 显示指定 ID (前缀) 的请求详情
        #[arg(long)]
        show: Option<String>,
    },
    /// 列出已固定的请求
    Pins {
        /// 显示指定 ID (前缀) 的请求详情
        #[arg(long)]
        show: Option<String>,
    },
    /// 查看或修改设置
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum SettingsAction {
    Show,
    AddUrl {
        url: String,
    },
    RemoveUrl {
        index: usize,
    },
    AutoCapture {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load_from_path(path)?.with_env_overrides(),
        None => ConfigLoader::find_and_load()?,
    };
    Ok(config)
}

pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::in_dir(&config.storage_dir));

    match cli.command {
        Commands::Replay {
            path,
            filter,
            pin,
            show,
        } => replay(store, &config, &path, filter, pin, show).await,
        Commands::Pins { show } => pins(store, show),
        Commands::Settings { action } => settings(store, action.unwrap_or(SettingsAction::Show)),
    }
}

async fn replay(
    store: Arc<dyn KeyValueStore>,
    config: &AppConfig,
    path: &Path,
    filter: Option<String>,
    pin: bool,
    show: Option<String>,
) -> Result<()> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut panel = Panel::open(store, config.timeline_capacity);

    let mut seen = 0;
    for (line_number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ExchangeRecord>(line) {
            Ok(record) => {
                seen += 1;
                // Bodies in a replay file are already complete, so waiting
                // here keeps the timeline in file order.
                if panel.on_exchange(record.into()) {
                    panel.next_captured().await;
                }
            }
            Err(e) => warn!("Skipping line {}: {}", line_number + 1, e),
        }
    }

    if let Some(filter) = filter {
        panel.on_filter_change(filter);
    }

    if pin {
        let candidates: Vec<&CapturedRequest> = panel.visible().iter().collect();
        let ids = select_interactive(&candidates, |id| panel.pins().is_pinned(id))?;
        for id in ids {
            panel.on_toggle_pin(&id);
        }
    }

    let visible = panel.visible();
    let list: Vec<&CapturedRequest> = visible.iter().collect();
    println!(
        "{}",
        request_table(&list, |id| panel.pins().is_pinned(id))
    );
    if panel.filter().is_empty() {
        println!(
            "{} exchange(s) replayed, {} captured (keeping {}), {} pinned",
            seen,
            panel.timeline().len(),
            panel.timeline().capacity(),
            panel.pins().pinned().len()
        );
    } else {
        println!("{} of {} requests", visible.len(), visible.total);
    }

    if let Some(prefix) = show {
        let request = find_by_prefix(&list, &prefix)?;
        println!("\n{}", RequestPrinter::default().format(request));
    }

    Ok(())
}

fn pins(store: Arc<dyn KeyValueStore>, show: Option<String>) -> Result<()> {
    let pins = PinStore::open(store);
    let list: Vec<&CapturedRequest> = pins.pinned().iter().collect();

    match show {
        Some(prefix) => {
            let request = find_by_prefix(&list, &prefix)?;
            println!("{}", RequestPrinter::default().format(request));
        }
        None => {
            println!("{}", request_table(&list, |_| true));
            println!("{} pinned", list.len());
        }
    }
    Ok(())
}

fn settings(store: Arc<dyn KeyValueStore>, action: SettingsAction) -> Result<()> {
    let mut settings_store = SettingsStore::open(store);
    let mut settings = settings_store.current().clone();

    match action {
        SettingsAction::Show => {}
        SettingsAction::AddUrl { url } => {
            settings.add_url(url);
            settings_store.save(settings);
        }
        SettingsAction::RemoveUrl { index } => {
            let removed = settings.remove_url(index)?;
            settings_store.save(settings);
            println!("Removed {}", removed);
        }
        SettingsAction::AutoCapture { enabled } => {
            settings.auto_capture = enabled;
            settings_store.save(settings);
        }
    }

    let current = settings_store.current();
    println!("URLs to monitor:");
    for (index, url) in current.urls.iter().enumerate() {
        let marker = if index == 0 { " (default)" } else { "" };
        println!("  [{}] {}{}", index, url, marker);
    }
    println!("Auto capture: {}", current.auto_capture);
    println!("Version: {}", current.version);
    Ok(())
}

/// 按 ID 前缀查找唯一的请求
fn find_by_prefix<'a>(list: &[&'a CapturedRequest], prefix: &str) -> Result<&'a CapturedRequest> {
    let mut matches = list.iter().copied().filter(|r| r.id.starts_with(prefix));
    match (matches.next(), matches.next()) {
        (Some(request), None) => Ok(request),
        (None, _) => Err(anyhow!("No request with id starting with '{}'", prefix)),
        (Some(_), Some(_)) => Err(anyhow!("Id prefix '{}' is ambiguous", prefix)),
    }
}

/// Interactively pick requests whose pin state should be toggled.
fn select_interactive<F>(requests: &[&CapturedRequest], is_pinned: F) -> Result<Vec<String>>
where
    F: Fn(&str) -> bool,
{
    if requests.is_empty() {
        return Ok(Vec::new());
    }

    #[derive(Clone)]
    struct EntryWrapper {
        id: String,
        display: String,
    }

    impl std::fmt::Display for EntryWrapper {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.display)
        }
    }

    let options: Vec<EntryWrapper> = requests
        .iter()
        .map(|r| EntryWrapper {
            id: r.id.clone(),
            display: format_entry_for_display(r, is_pinned(&r.id)),
        })
        .collect();

    let selected = MultiSelect::new("Select requests to pin or unpin:", options)
        .with_page_size(15)
        .with_help_message("Space to select, Enter to finish, type to filter")
        .prompt()
        .map_err(|e| anyhow!("Interaction canceled or failed: {}", e))?;

    Ok(selected.into_iter().map(|w| w.id).collect())
}

fn format_entry_for_display(request: &CapturedRequest, pinned: bool) -> String {
    let pin = if pinned { "📌 " } else { "" };
    let summary = cubescope::view::QuerySummary::of(&request.query).badges();
    let status = if request.response.is_pending() {
        "wait".to_string()
    } else {
        request.status.to_string()
    };
    format!("{pin}[{status}] {} {summary}", request.domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubescope::capture::interpret_response;
    use cubescope::capture::model::Query;

    fn dummy_request(id: &str) -> CapturedRequest {
        CapturedRequest {
            id: id.to_string(),
            url: "http://localhost:4000/cubejs-api/v1/load".to_string(),
            domain: "localhost:4000".to_string(),
            query: Query::from_value(serde_json::json!({"measures": ["Orders.count"]})).unwrap(),
            response: interpret_response(200, r#"{"error":"Continue wait"}"#).unwrap(),
            timestamp: 0,
            duration: None,
            status: 200,
        }
    }

    #[test]
    fn test_parse_replay() {
        let cli = Cli::try_parse_from([
            "cubescope",
            "replay",
            "exchanges.jsonl",
            "--filter",
            "orders",
            "--pin",
        ])
        .unwrap();

        match cli.command {
            Commands::Replay {
                path, filter, pin, ..
            } => {
                assert_eq!(path, PathBuf::from("exchanges.jsonl"));
                assert_eq!(filter.as_deref(), Some("orders"));
                assert!(pin);
            }
            _ => panic!("Expected replay command"),
        }
    }

    #[test]
    fn test_parse_settings_actions() {
        let cli = Cli::try_parse_from(["cubescope", "settings", "auto-capture", "false"]).unwrap();
        match cli.command {
            Commands::Settings { action } => {
                assert_eq!(action, Some(SettingsAction::AutoCapture { enabled: false }))
            }
            _ => panic!("Expected settings command"),
        }

        let cli = Cli::try_parse_from(["cubescope", "settings", "remove-url", "2"]).unwrap();
        match cli.command {
            Commands::Settings { action } => {
                assert_eq!(action, Some(SettingsAction::RemoveUrl { index: 2 }))
            }
            _ => panic!("Expected settings command"),
        }
    }

    #[test]
    fn test_find_by_prefix() {
        let a = dummy_request("1700-aaaa");
        let b = dummy_request("1700-bbbb");
        let list = vec![&a, &b];

        assert_eq!(find_by_prefix(&list, "1700-b").unwrap().id, "1700-bbbb");
        assert!(find_by_prefix(&list, "1700").is_err());
        assert!(find_by_prefix(&list, "9").is_err());
    }

    #[test]
    fn test_format_display() {
        let display = format_entry_for_display(&dummy_request("1"), true);
        assert_eq!(display, "📌 [wait] localhost:4000 1 cube: Orders · 1 measure");
    }
}
