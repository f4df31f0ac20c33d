use tracing::{error, info, warn};

use veriflow_core::config::SessionConfig;
use veriflow_core::{Cookie, RetryOutcome, RetryPolicy, SessionToken, VerifyError};

use crate::probe::PageProbe;

/// Second delimiter-separated segment of the named cookie's value.
pub fn token_from_cookies(cookies: &[Cookie], name: &str, delimiter: &str) -> Option<SessionToken> {
    let cookie = cookies.iter().find(|c| c.name == name)?;
    cookie
        .value
        .split(delimiter)
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .map(SessionToken::new)
}

pub struct SessionTokenExtractor {
    cookie_name: String,
    delimiter: String,
    policy: RetryPolicy,
}

impl SessionTokenExtractor {
    pub fn new(cookie_name: impl Into<String>, delimiter: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            delimiter: delimiter.into(),
            policy: policy.fail_fast(false),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, VerifyError> {
        Ok(Self::new(
            config.cookie_name.clone(),
            config.delimiter.clone(),
            config.retry_policy()?,
        ))
    }

    /// Read the cookie jar until the session cookie shows up.
    /// `None` once the attempts are used up.
    pub async fn extract_token(&self, probe: &dyn PageProbe) -> Option<SessionToken> {
        info!(cookie = %self.cookie_name, "reading session cookie");

        let outcome = self
            .policy
            .execute(|attempt| async move {
                let cookies = probe.cookies().await?;
                let token = token_from_cookies(&cookies, &self.cookie_name, &self.delimiter);
                if token.is_none() {
                    warn!(
                        attempt,
                        remaining = self.policy.max_attempts() - attempt,
                        "session cookie not available yet"
                    );
                }
                Ok::<_, VerifyError>(token)
            })
            .await;

        match outcome {
            RetryOutcome::Success(token) => {
                info!("🔑 session token extracted");
                Some(token)
            }
            RetryOutcome::Exhausted { attempts, last_error } => {
                error!(
                    attempts,
                    last_error = last_error.map(|e| e.to_string()).unwrap_or_default(),
                    "could not read session token"
                );
                None
            }
            RetryOutcome::Fatal(e) => {
                error!(error = %e, "could not read session token");
                None
            }
        }
    }
}
