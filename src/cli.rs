use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "veriflow", about = "Verification code retrieval and challenge handling")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Wait for a verification mail and print its code
    FetchCode {
        /// Address the code was sent to
        #[arg(short, long)]
        recipient: Option<String>,

        /// Outer retry attempts
        #[arg(short, long)]
        attempts: Option<u32>,

        /// Seconds between outer attempts
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Print the effective configuration with secrets redacted
    ShowConfig,
}
