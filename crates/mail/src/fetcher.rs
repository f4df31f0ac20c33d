use tracing::{info, warn};

use veriflow_core::config::MailConfig;
use veriflow_core::{CodeMatch, RetryOutcome, RetryPolicy, VerificationCode, VerifyError};

use crate::backend::{Backend, MailBackend};

/// Outer retry loop around a single mail backend.
pub struct VerificationCodeFetcher<B = Backend> {
    backend: B,
    recipient: String,
    policy: RetryPolicy,
}

impl VerificationCodeFetcher<Backend> {
    pub fn from_config(mail: &MailConfig) -> Result<Self, VerifyError> {
        let backend = Backend::from_config(mail)?;
        Ok(Self::new(
            backend,
            mail.effective_recipient().to_string(),
            mail.fetch_policy()?,
        ))
    }
}

impl<B: MailBackend> VerificationCodeFetcher<B> {
    pub fn new(backend: B, recipient: String, policy: RetryPolicy) -> Self {
        Self {
            backend,
            recipient,
            policy: policy.fail_fast(false),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Poll the backend until a code shows up or the attempts run out.
    /// The message is cleaned up before returning.
    pub async fn get_verification_code(&self) -> Result<VerificationCode, VerifyError> {
        Ok(self.fetch_match().await?.code)
    }

    /// Like [`get_verification_code`](Self::get_verification_code) but keeps
    /// the message the code came from.
    pub async fn fetch_match(&self) -> Result<CodeMatch, VerifyError> {
        let max = self.policy.max_attempts();
        info!(
            backend = self.backend.name(),
            recipient = %self.recipient,
            attempts = max,
            "📬 waiting for verification code"
        );

        let outcome = self
            .policy
            .execute(|attempt| async move {
                let result = self.backend.fetch_code(&self.recipient).await;
                if let Ok(None) = result {
                    info!(attempt, remaining = max - attempt, "no verification code yet");
                }
                result
            })
            .await;

        match outcome {
            RetryOutcome::Success(found) => {
                info!(
                    code = %found.code,
                    backend = self.backend.name(),
                    message = %found.message.received_ref,
                    "✅ verification code received"
                );
                if !self.backend.cleanup(&found.message).await {
                    warn!(backend = self.backend.name(), "verification mail left in mailbox");
                }
                Ok(found)
            }
            other => {
                let err = other
                    .into_result()
                    .err()
                    .unwrap_or(VerifyError::RetryExhausted {
                        attempts: max,
                        last_error: None,
                    });
                warn!(error = %err, "giving up on verification code");
                Err(err)
            }
        }
    }
}
