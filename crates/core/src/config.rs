use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

use crate::error::VerifyError;
use crate::retry::{Delay, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for VerifyError {
    fn from(err: ConfigError) -> Self {
        VerifyError::Config(err.to_string())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub mail: MailConfig,
    #[serde(default)]
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    pub backend: BackendConfig,
    /// Address the verification mail is sent to. Falls back to the IMAP user.
    #[serde(default)]
    pub recipient: String,
    /// Sender the POP3 backend filters on.
    #[serde(default = "default_expected_sender")]
    pub expected_sender: String,
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_seconds: u64,
    /// Inner "check again shortly" loop of the IMAP and POP3 backends.
    #[serde(default = "default_poll_limit")]
    pub poll_limit: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Pause after each temp mailbox API request.
    #[serde(default = "default_request_pause_ms")]
    pub request_pause_ms: u64,
    #[serde(default = "default_cleanup_attempts")]
    pub cleanup_attempts: u32,
    /// Mailbox domains that need an IMAP `ID` handshake before searching.
    #[serde(default = "default_id_handshake_domains")]
    pub id_handshake_domains: Vec<String>,
}

#[derive(Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Imap(ImapConfig),
    Pop3(Pop3Config),
    #[serde(rename = "tempmail")]
    TempMail(TempMailConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Imap(_) => "imap",
            BackendConfig::Pop3(_) => "pop3",
            BackendConfig::TempMail(_) => "tempmail",
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendConfig::Imap(c) => c.fmt(f),
            BackendConfig::Pop3(c) => c.fmt(f),
            BackendConfig::TempMail(c) => c.fmt(f),
        }
    }
}

#[derive(Deserialize, Clone, PartialEq, Eq)]
pub struct ImapConfig {
    pub server: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub user: String,
    pub pass: String,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &"[REDACTED]")
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

#[derive(Deserialize, Clone, PartialEq, Eq)]
pub struct Pop3Config {
    pub server: String,
    #[serde(default = "default_pop3_port")]
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl fmt::Debug for Pop3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pop3Config")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize, Clone, PartialEq, Eq)]
pub struct TempMailConfig {
    pub mailbox_name: String,
    /// Appended verbatim to the name, e.g. `@mailto.plus`.
    pub domain_suffix: String,
    #[serde(default)]
    pub epin: String,
    #[serde(default = "default_tempmail_base_url")]
    pub base_url: String,
}

impl TempMailConfig {
    pub fn address(&self) -> String {
        format!("{}{}", self.mailbox_name, self.domain_suffix)
    }
}

impl fmt::Debug for TempMailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempMailConfig")
            .field("mailbox_name", &self.mailbox_name)
            .field("domain_suffix", &self.domain_suffix)
            .field("epin", &if self.epin.is_empty() { "" } else { "[REDACTED]" })
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChallengeConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_round_delay_min")]
    pub round_delay_min_seconds: f64,
    #[serde(default = "default_round_delay_max")]
    pub round_delay_max_seconds: f64,
    #[serde(default = "default_click_delay_min")]
    pub click_delay_min_seconds: f64,
    #[serde(default = "default_click_delay_max")]
    pub click_delay_max_seconds: f64,
    #[serde(default = "default_settle_seconds")]
    pub settle_seconds: f64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            round_delay_min_seconds: default_round_delay_min(),
            round_delay_max_seconds: default_round_delay_max(),
            click_delay_min_seconds: default_click_delay_min(),
            click_delay_max_seconds: default_click_delay_max(),
            settle_seconds: default_settle_seconds(),
        }
    }
}

impl ChallengeConfig {
    pub fn round_policy(&self) -> Result<RetryPolicy, VerifyError> {
        Ok(RetryPolicy::new(
            self.max_rounds,
            Delay::jittered_secs(self.round_delay_min_seconds, self.round_delay_max_seconds)?,
        )?
        .label("challenge"))
    }

    pub fn click_delay(&self) -> Result<Delay, VerifyError> {
        Delay::jittered_secs(self.click_delay_min_seconds, self.click_delay_max_seconds)
    }

    pub fn settle_delay(&self) -> Result<Delay, VerifyError> {
        Delay::fixed_secs_f64(self.settle_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_session_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_session_interval")]
    pub retry_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            delimiter: default_delimiter(),
            max_attempts: default_session_attempts(),
            retry_interval_seconds: default_session_interval(),
        }
    }
}

impl SessionConfig {
    pub fn retry_policy(&self) -> Result<RetryPolicy, VerifyError> {
        Ok(RetryPolicy::new(self.max_attempts, Delay::fixed_secs(self.retry_interval_seconds))?
            .label("session token"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: PathBuf,
    #[serde(default = "default_true")]
    pub timestamped: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            screenshot_dir: default_screenshot_dir(),
            timestamped: true,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(raw)?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply the `.env`-style overrides.
    ///
    /// `TEMP_MAIL` selects the temp mailbox backend unless it is the literal
    /// `null`, in which case `IMAP_PROTOCOL` (default `POP3`) picks between
    /// IMAP and POP3 using the `IMAP_*` variables.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(recipient) = lookup("VERIFLOW_RECIPIENT") {
            self.mail.recipient = recipient;
        }

        let Some(temp_mail) = lookup("TEMP_MAIL") else {
            return Ok(());
        };

        if temp_mail != "null" {
            let previous = match &self.mail.backend {
                BackendConfig::TempMail(c) => Some(c.clone()),
                _ => None,
            };
            let domain_suffix = lookup("TEMP_MAIL_EXT")
                .or_else(|| previous.as_ref().map(|c| c.domain_suffix.clone()))
                .ok_or_else(|| ConfigError::Invalid("TEMP_MAIL_EXT is not set".into()))?;
            self.mail.backend = BackendConfig::TempMail(TempMailConfig {
                mailbox_name: temp_mail,
                domain_suffix,
                epin: lookup("TEMP_MAIL_EPIN")
                    .or_else(|| previous.as_ref().map(|c| c.epin.clone()))
                    .unwrap_or_default(),
                base_url: previous
                    .map(|c| c.base_url)
                    .unwrap_or_else(default_tempmail_base_url),
            });
            return Ok(());
        }

        let require = |key: &str| {
            lookup(key).ok_or_else(|| ConfigError::Invalid(format!("{} is not set", key)))
        };
        let server = require("IMAP_SERVER")?;
        let user = require("IMAP_USER")?;
        let pass = require("IMAP_PASS")?;
        let port = lookup("IMAP_PORT")
            .map(|p| {
                p.trim()
                    .parse::<u16>()
                    .map_err(|_| ConfigError::Invalid(format!("IMAP_PORT is not a port: {}", p)))
            })
            .transpose()?;
        let protocol = lookup("IMAP_PROTOCOL").unwrap_or_else(|| "POP3".to_string());

        self.mail.backend = if protocol.eq_ignore_ascii_case("IMAP") {
            BackendConfig::Imap(ImapConfig {
                server,
                port: port.unwrap_or_else(default_imap_port),
                user,
                pass,
                mailbox: lookup("IMAP_DIR").unwrap_or_else(default_mailbox),
            })
        } else if protocol.eq_ignore_ascii_case("POP3") {
            BackendConfig::Pop3(Pop3Config {
                server,
                port: port.unwrap_or_else(default_pop3_port),
                user,
                pass,
            })
        } else {
            return Err(ConfigError::Invalid(format!(
                "IMAP_PROTOCOL must be IMAP or POP3, got {}",
                protocol
            )));
        };

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mail = &self.mail;
        if mail.fetch_attempts == 0 || mail.poll_limit == 0 || mail.cleanup_attempts == 0 {
            return Err(ConfigError::Invalid("retry attempt counts must be at least 1".into()));
        }
        if self.challenge.max_rounds == 0 || self.session.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry attempt counts must be at least 1".into()));
        }
        let c = &self.challenge;
        let delays = [
            c.round_delay_min_seconds,
            c.round_delay_max_seconds,
            c.click_delay_min_seconds,
            c.click_delay_max_seconds,
            c.settle_seconds,
        ];
        if delays.iter().any(|secs| !secs.is_finite() || *secs < 0.0) {
            return Err(ConfigError::Invalid(
                "challenge delays must be finite and non-negative".into(),
            ));
        }
        if self.challenge.round_delay_min_seconds > self.challenge.round_delay_max_seconds
            || self.challenge.click_delay_min_seconds > self.challenge.click_delay_max_seconds
        {
            return Err(ConfigError::Invalid("delay ranges must have min <= max".into()));
        }
        if self.session.delimiter.is_empty() {
            return Err(ConfigError::Invalid("session.delimiter must not be empty".into()));
        }

        match &mail.backend {
            BackendConfig::Imap(c) => {
                check_server(&c.server, c.port)?;
                if mail.effective_recipient().is_empty() {
                    return Err(ConfigError::Invalid("mail.recipient is required for IMAP".into()));
                }
            }
            BackendConfig::Pop3(c) => {
                check_server(&c.server, c.port)?;
                if mail.expected_sender.is_empty() {
                    return Err(ConfigError::Invalid(
                        "mail.expected_sender is required for POP3".into(),
                    ));
                }
            }
            BackendConfig::TempMail(c) => {
                if c.mailbox_name.is_empty() || c.domain_suffix.is_empty() {
                    return Err(ConfigError::Invalid(
                        "temp mailbox name and domain suffix are required".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl MailConfig {
    pub fn effective_recipient(&self) -> &str {
        if !self.recipient.is_empty() {
            return &self.recipient;
        }
        match &self.backend {
            BackendConfig::Imap(c) => &c.user,
            BackendConfig::Pop3(c) => &c.user,
            BackendConfig::TempMail(_) => "",
        }
    }

    pub fn fetch_policy(&self) -> Result<RetryPolicy, VerifyError> {
        Ok(RetryPolicy::new(self.fetch_attempts, Delay::fixed_secs(self.fetch_interval_seconds))?
            .label("verification code"))
    }
}

fn check_server(server: &str, port: u16) -> Result<(), ConfigError> {
    if server.trim().is_empty() {
        return Err(ConfigError::Invalid("mail server is empty".into()));
    }
    if port == 0 {
        return Err(ConfigError::Invalid("mail server port is 0".into()));
    }
    Ok(())
}

fn default_expected_sender() -> String { "no-reply@cursor.sh".to_string() }
fn default_fetch_attempts() -> u32 { 5 }
fn default_fetch_interval() -> u64 { 60 }
fn default_poll_limit() -> u32 { 20 }
fn default_poll_interval() -> u64 { 3 }
fn default_request_pause_ms() -> u64 { 500 }
fn default_cleanup_attempts() -> u32 { 5 }
fn default_id_handshake_domains() -> Vec<String> {
    vec!["163.com".to_string(), "126.com".to_string(), "yeah.net".to_string()]
}
fn default_imap_port() -> u16 { 993 }
fn default_pop3_port() -> u16 { 995 }
fn default_mailbox() -> String { "INBOX".to_string() }
fn default_tempmail_base_url() -> String { "https://tempmail.plus/api".to_string() }
fn default_max_rounds() -> u32 { 2 }
fn default_round_delay_min() -> f64 { 1.0 }
fn default_round_delay_max() -> f64 { 2.0 }
fn default_click_delay_min() -> f64 { 1.0 }
fn default_click_delay_max() -> f64 { 3.0 }
fn default_settle_seconds() -> f64 { 2.0 }
fn default_cookie_name() -> String { "WorkosCursorSessionToken".to_string() }
fn default_delimiter() -> String { "%3A%3A".to_string() }
fn default_session_attempts() -> u32 { 3 }
fn default_session_interval() -> u64 { 2 }
fn default_screenshot_dir() -> PathBuf { PathBuf::from("screenshots") }
fn default_true() -> bool { true }
