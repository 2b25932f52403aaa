use tracing_subscriber::{EnvFilter, fmt};

/// 初始化日志系统
///
/// 支持通过 RUST_LOG 环境变量控制日志级别,
/// 未设置时使用配置文件中的 `log_level`, 再退回到 info
///
/// 示例:
/// - RUST_LOG=debug cubescope replay exchanges.jsonl
/// - RUST_LOG=cubescope::capture=trace cubescope replay exchanges.jsonl
pub fn init_logger(default_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.unwrap_or("info")));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Logger initialized");
}
