use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::VerifyError;

/// Backend-specific handle used to delete or acknowledge a fetched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRef {
    /// IMAP UID within the selected mailbox.
    Uid(u32),
    /// POP3 message ordinal (1-based, valid for the session that produced it).
    Index(u32),
    /// Message id issued by the temp mailbox REST API.
    RestId(String),
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRef::Uid(uid) => write!(f, "uid:{}", uid),
            MessageRef::Index(idx) => write!(f, "pop3:{}", idx),
            MessageRef::RestId(id) => write!(f, "rest:{}", id),
        }
    }
}

/// One fetched email, normalized across transports.
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub sender: String,
    pub subject: String,
    /// Decoded plain-text body.
    pub body: String,
    pub received_ref: MessageRef,
}

/// Exactly six ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VerificationCode(String);

impl VerificationCode {
    pub fn parse(raw: &str) -> Result<Self, VerifyError> {
        if raw.len() == 6 && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(VerifyError::MalformedMessage(format!(
                "not a 6-digit code: {:?}",
                raw
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn digits(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars()
    }
}

impl fmt::Display for VerificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A code together with the message it was found in.
#[derive(Debug, Clone)]
pub struct CodeMatch {
    pub code: VerificationCode,
    pub message: MailMessage,
}

/// Named page states the challenge detector can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeState {
    PasswordEntry,
    ChallengePending,
    SettingsReached,
    Indeterminate,
}

impl ChallengeState {
    /// Whether the flow may move past the challenge.
    pub fn is_cleared(&self) -> bool {
        matches!(self, ChallengeState::PasswordEntry | ChallengeState::SettingsReached)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Opaque session token recovered from a cookie value.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(6).collect();
        write!(f, "SessionToken({}…)", visible)
    }
}
