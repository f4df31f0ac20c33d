use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    /// Mail not arrived yet, cookie not set yet. Always retried locally.
    #[error("not yet available: {0}")]
    NotYetAvailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Unexpected server reply or page structure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The automated page or browser went away.
    #[error("page closed: {0}")]
    PageClosed(String),

    #[error("no verification code after {polls} mailbox polls")]
    PollTimeout { polls: u32 },

    #[error("challenge still unresolved after {rounds} rounds")]
    ChallengeUnresolved { rounds: u32 },

    #[error("gave up after {attempts} attempts{}", cause_suffix(.last_error))]
    RetryExhausted {
        attempts: u32,
        last_error: Option<Box<VerifyError>>,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

fn cause_suffix(cause: &Option<Box<VerifyError>>) -> String {
    cause.as_ref().map(|e| format!(": {e}")).unwrap_or_default()
}

impl VerifyError {
    /// Errors a retry loop may swallow and count as a failed attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VerifyError::NotYetAvailable(_)
                | VerifyError::Transport(_)
                | VerifyError::MalformedMessage(_)
                | VerifyError::PollTimeout { .. }
        )
    }

    /// Connection, login and HTTP failures; retry loops log these at error level.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, VerifyError::Transport(_))
    }
}

impl From<std::io::Error> for VerifyError {
    fn from(err: std::io::Error) -> Self {
        VerifyError::Transport(err.to_string())
    }
}
