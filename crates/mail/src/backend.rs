use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use veriflow_core::config::{BackendConfig, MailConfig};
use veriflow_core::{CodeMatch, MailMessage, VerifyError};

use crate::imap::ImapBackend;
use crate::pop3::Pop3Backend;
use crate::tempmail::TempMailBackend;
use crate::transport::TlsConnector;

/// A mailbox that can be asked for the latest verification code.
#[async_trait]
pub trait MailBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// One outer attempt. `Ok(None)` means the code has not arrived yet.
    async fn fetch_code(&self, recipient: &str) -> Result<Option<CodeMatch>, VerifyError>;

    /// Remove a consumed message. Returns `false` when removal could not be
    /// confirmed; the code is still valid either way.
    async fn cleanup(&self, _message: &MailMessage) -> bool {
        true
    }
}

/// Spacing of the IMAP/POP3 "not arrived yet" self-retry.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub limit: u32,
    pub interval: Duration,
}

impl PollSettings {
    pub fn from_config(mail: &MailConfig) -> Self {
        Self {
            limit: mail.poll_limit.max(1),
            interval: Duration::from_secs(mail.poll_interval_seconds),
        }
    }
}

/// The configured backend for this run.
pub enum Backend {
    Imap(ImapBackend),
    Pop3(Pop3Backend),
    TempMail(TempMailBackend),
}

impl Backend {
    pub fn from_config(mail: &MailConfig) -> Result<Self, VerifyError> {
        let poll = PollSettings::from_config(mail);
        let backend = match &mail.backend {
            BackendConfig::Imap(cfg) => Backend::Imap(ImapBackend::new(
                cfg.clone(),
                Arc::new(TlsConnector::new()?),
                poll,
                mail.id_handshake_domains.clone(),
            )),
            BackendConfig::Pop3(cfg) => Backend::Pop3(Pop3Backend::new(
                cfg.clone(),
                Arc::new(TlsConnector::new()?),
                poll,
                mail.expected_sender.clone(),
            )),
            BackendConfig::TempMail(cfg) => Backend::TempMail(TempMailBackend::new(
                cfg.clone(),
                Duration::from_millis(mail.request_pause_ms),
                mail.cleanup_attempts,
            )?),
        };
        Ok(backend)
    }

    fn inner(&self) -> &dyn MailBackend {
        match self {
            Backend::Imap(b) => b,
            Backend::Pop3(b) => b,
            Backend::TempMail(b) => b,
        }
    }
}

#[async_trait]
impl MailBackend for Backend {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    async fn fetch_code(&self, recipient: &str) -> Result<Option<CodeMatch>, VerifyError> {
        self.inner().fetch_code(recipient).await
    }

    async fn cleanup(&self, message: &MailMessage) -> bool {
        self.inner().cleanup(message).await
    }
}
