mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli::load_config(cli.config.as_deref())?;

    // 初始化日志系统
    cubescope::logger::init_logger(config.log_level.as_deref());

    cli::run(cli, config).await
}
