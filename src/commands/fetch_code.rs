use anyhow::{Context, Result};
use tracing::info;

use veriflow_core::config::AppConfig;
use veriflow_mail::VerificationCodeFetcher;

pub async fn run(
    mut config: AppConfig,
    recipient: Option<String>,
    attempts: Option<u32>,
    interval: Option<u64>,
) -> Result<()> {
    if let Some(recipient) = recipient {
        config.mail.recipient = recipient;
    }
    if let Some(attempts) = attempts {
        config.mail.fetch_attempts = attempts;
    }
    if let Some(interval) = interval {
        config.mail.fetch_interval_seconds = interval;
    }
    config.validate().context("invalid configuration")?;

    let fetcher = VerificationCodeFetcher::from_config(&config.mail)?;
    info!(backend = %config.mail.backend.kind(), "starting verification code fetch");

    let code = fetcher.get_verification_code().await?;
    println!("{}", code);
    Ok(())
}
