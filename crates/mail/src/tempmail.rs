//! Disposable-inbox backend over the tempmail.plus REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use veriflow_core::config::TempMailConfig;
use veriflow_core::{CodeMatch, Delay, MailMessage, MessageRef, RetryPolicy, VerifyError};

use crate::backend::MailBackend;
use crate::extract::find_code_guarded;

const LIST_LIMIT: &str = "20";

#[derive(Debug, Deserialize)]
struct MailList {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    first_id: Value,
}

#[derive(Debug, Deserialize)]
struct MailDetail {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    from_mail: String,
}

#[derive(Debug, Deserialize)]
struct DeleteReply {
    #[serde(default)]
    result: Value,
}

/// The API answers `result: true` on success; anything else is a miss.
fn succeeded(result: &Value) -> bool {
    matches!(result, Value::Bool(true))
}

/// `first_id` arrives as a number or a string; zero and empty mean "no mail".
fn message_id(first_id: &Value) -> Option<String> {
    match first_id {
        Value::Number(n) if n.as_u64() != Some(0) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() && s != "0" => Some(s.clone()),
        _ => None,
    }
}

async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, VerifyError> {
    let resp = request
        .send()
        .await
        .map_err(|e| VerifyError::Transport(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(VerifyError::Transport(format!("temp mail API returned HTTP {}", status)));
    }

    resp.json::<T>()
        .await
        .map_err(|e| VerifyError::MalformedMessage(format!("temp mail API reply: {}", e)))
}

pub struct TempMailBackend {
    config: TempMailConfig,
    base: Url,
    client: reqwest::Client,
    request_pause: Duration,
    cleanup_policy: RetryPolicy,
}

impl TempMailBackend {
    pub fn new(
        config: TempMailConfig,
        request_pause: Duration,
        cleanup_attempts: u32,
    ) -> Result<Self, VerifyError> {
        let base = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| VerifyError::Config(format!("invalid temp mail base url: {}", e)))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VerifyError::Transport(e.to_string()))?;

        // DELETE attempts are spaced by the policy, not by `call`.
        let cleanup_policy = RetryPolicy::new(cleanup_attempts, Delay::Fixed(request_pause))?
            .label("temp mail cleanup");

        Ok(Self {
            config,
            base,
            client,
            request_pause,
            cleanup_policy,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), path)
    }

    /// Send a request, decode the JSON reply, then observe the rate-limit pause.
    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, VerifyError> {
        let outcome = send_json(request).await;
        tokio::time::sleep(self.request_pause).await;
        outcome
    }

    async fn delete_once(&self, message_id: &str) -> Result<Option<()>, VerifyError> {
        let address = self.config.address();
        let request = self.client.delete(self.endpoint("mails/")).form(&[
            ("email", address.as_str()),
            ("first_id", message_id),
            ("epin", self.config.epin.as_str()),
        ]);
        let reply: DeleteReply = send_json(request).await?;
        Ok(succeeded(&reply.result).then_some(()))
    }

    /// Delete one message, retrying until the API confirms. Never fails;
    /// returns whether the deletion was confirmed.
    pub async fn delete_message(&self, message_id: &str) -> bool {
        let outcome = self
            .cleanup_policy
            .execute(|_| self.delete_once(message_id))
            .await;

        if outcome.is_success() {
            info!(message_id, "🗑 temp mail message deleted");
            true
        } else {
            warn!(
                message_id,
                attempts = self.cleanup_policy.max_attempts(),
                "could not confirm temp mail deletion"
            );
            false
        }
    }
}

#[async_trait]
impl MailBackend for TempMailBackend {
    fn name(&self) -> &'static str {
        "tempmail"
    }

    /// Reads only the newest message; the outer retry handles "not yet".
    async fn fetch_code(&self, _recipient: &str) -> Result<Option<CodeMatch>, VerifyError> {
        let address = self.config.address();
        let epin = self.config.epin.as_str();

        let list: MailList = self
            .call(self.client.get(self.endpoint("mails")).query(&[
                ("email", address.as_str()),
                ("limit", LIST_LIMIT),
                ("epin", epin),
            ]))
            .await?;

        if !succeeded(&list.result) {
            debug!("temp mail list request not successful");
            return Ok(None);
        }
        let Some(id) = message_id(&list.first_id) else {
            debug!(address = %address, "temp mail inbox is empty");
            return Ok(None);
        };

        let detail: MailDetail = self
            .call(
                self.client
                    .get(self.endpoint(&format!("mails/{}", id)))
                    .query(&[("email", address.as_str()), ("epin", epin)]),
            )
            .await?;

        if !succeeded(&detail.result) {
            debug!(id = %id, "temp mail detail request not successful");
            return Ok(None);
        }
        info!(subject = %detail.subject, "found temp mail message");

        let Some(code) = find_code_guarded(&detail.text) else {
            return Ok(None);
        };

        Ok(Some(CodeMatch {
            code,
            message: MailMessage {
                sender: detail.from_mail,
                subject: detail.subject,
                body: detail.text,
                received_ref: MessageRef::RestId(id),
            },
        }))
    }

    async fn cleanup(&self, message: &MailMessage) -> bool {
        match &message.received_ref {
            MessageRef::RestId(id) => self.delete_message(id).await,
            _ => true,
        }
    }
}
