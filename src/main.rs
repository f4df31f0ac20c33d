mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

use veriflow_core::config::AppConfig;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;

    // TEMP_MAIL / IMAP_* / VERIFLOW_RECIPIENT
    config.apply_env_overrides()?;

    match cli.command {
        Commands::FetchCode {
            recipient,
            attempts,
            interval,
        } => {
            commands::fetch_code::run(config, recipient, attempts, interval).await?;
        }
        Commands::ShowConfig => {
            if let Err(e) = config.validate() {
                warn!(error = %e, "configuration is incomplete");
            }
            commands::run_show_config(&config)?;
        }
    }

    Ok(())
}
