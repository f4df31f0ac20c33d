pub mod fetch_code;

use anyhow::Result;
use veriflow_core::config::AppConfig;

pub fn run_show_config(config: &AppConfig) -> Result<()> {
    let mail = &config.mail;
    println!("backend:          {}", mail.backend.kind());
    println!("recipient:        {}", mail.effective_recipient());
    println!(
        "fetch attempts:   {} every {}s",
        mail.fetch_attempts, mail.fetch_interval_seconds
    );
    println!(
        "mailbox polls:    {} every {}s",
        mail.poll_limit, mail.poll_interval_seconds
    );
    println!();
    println!("{:#?}", config);
    Ok(())
}
