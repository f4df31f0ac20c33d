pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::{AppConfig, BackendConfig, ConfigError};
pub use error::VerifyError;
pub use retry::{Delay, RetryOutcome, RetryPolicy};
pub use types::*;
