mod app;
mod cli;
mod config;

use anyhow::Context;
use clap::Parser;
use common::logger::init_logger;

use crate::cli::{Cli, Command};
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = AppConfig::from_env().context("invalid configuration")?;

    init_logger("mexc-monitor", cfg.json_logs);

    match cli.into_command() {
        Command::Run => app::run(cfg).await,
        Command::Status => app::status(&cfg).await,
        Command::Set { key, value } => app::set_threshold(&cfg, key, &value).await,
        Command::Blacklist(cmd) => app::blacklist(&cfg, cmd).await,
        Command::TestAlert => app::test_alert(&cfg).await,
    }
}
