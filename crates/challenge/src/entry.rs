use std::time::Duration;

use tracing::{debug, info};

use veriflow_core::{Delay, VerificationCode, VerifyError};

use crate::probe::{LookupKey, PageProbe};

/// Types a verification code into a row of single-digit input boxes
/// addressed as `<prefix><index>`.
#[derive(Debug, Clone)]
pub struct CodeEntry {
    key_prefix: String,
    keystroke_delay: Delay,
}

impl Default for CodeEntry {
    fn default() -> Self {
        Self::new(
            "@data-index=",
            Delay::Jittered {
                min: Duration::from_millis(100),
                max: Duration::from_millis(300),
            },
        )
    }
}

impl CodeEntry {
    pub fn new(key_prefix: impl Into<String>, keystroke_delay: Delay) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            keystroke_delay,
        }
    }

    pub async fn enter_code(&self, probe: &dyn PageProbe, code: &VerificationCode) -> Result<(), VerifyError> {
        info!("entering verification code");

        for (index, digit) in code.digits().enumerate() {
            if index > 0 {
                self.keystroke_delay.wait().await;
            }

            let key = LookupKey::new(format!("{}{}", self.key_prefix, index));
            let Some(field) = probe.locate(&key).await? else {
                return Err(VerifyError::Protocol(format!("code input {} not found", key)));
            };
            probe.input(&field, &digit.to_string()).await?;
            debug!(index, "digit entered");
        }
        Ok(())
    }
}
