use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use veriflow_core::config::Pop3Config;
use veriflow_core::{CodeMatch, MailMessage, MessageRef, VerifyError};

use crate::backend::{MailBackend, PollSettings};
use crate::extract::find_code;
use crate::mime::decode_message;
use crate::transport::{Connector, LineStream, MailStream};

/// How many of the most recent messages are inspected per poll.
pub const RECENT_WINDOW: usize = 10;

/// One entry of a `LIST` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listing {
    pub index: u32,
    pub size: u64,
}

pub struct Pop3Client {
    stream: LineStream,
}

impl Pop3Client {
    pub async fn start(stream: Box<dyn MailStream>) -> Result<Self, VerifyError> {
        let mut stream = LineStream::new(stream);
        let greeting = stream.read_line().await?;
        if !greeting.starts_with("+OK") {
            return Err(VerifyError::Protocol(format!("unexpected POP3 greeting: {}", greeting)));
        }
        Ok(Self { stream })
    }

    /// Send a command and return the text after `+OK`.
    async fn command(&mut self, command: &str) -> Result<String, VerifyError> {
        self.stream.write_line(command).await?;
        let reply = self.stream.read_line().await?;
        if let Some(rest) = reply.strip_prefix("+OK") {
            return Ok(rest.trim().to_string());
        }
        let verb = command.split_whitespace().next().unwrap_or(command);
        Err(VerifyError::Protocol(format!("POP3 {} failed: {}", verb, reply)))
    }

    /// Read a multi-line body up to the lone `.`, undoing dot-stuffing.
    async fn read_multiline(&mut self) -> Result<Vec<u8>, VerifyError> {
        let mut data = Vec::new();
        loop {
            let line = self.stream.read_raw_line().await?;
            let content = line
                .strip_suffix(b"\r\n")
                .or_else(|| line.strip_suffix(b"\n"))
                .unwrap_or(&line);
            if content == b"." {
                return Ok(data);
            }
            if line.starts_with(b"..") {
                data.extend_from_slice(&line[1..]);
            } else {
                data.extend_from_slice(&line);
            }
        }
    }

    pub async fn login(&mut self, user: &str, pass: &str) -> Result<(), VerifyError> {
        let rejected = |e: VerifyError| VerifyError::Transport(format!("POP3 login rejected: {}", e));
        self.command(&format!("USER {}", user)).await.map_err(rejected)?;
        self.command(&format!("PASS {}", pass)).await.map_err(rejected)?;
        Ok(())
    }

    pub async fn list(&mut self) -> Result<Vec<Listing>, VerifyError> {
        self.command("LIST").await?;
        let data = self.read_multiline().await?;
        let listings = String::from_utf8_lossy(&data)
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let index = parts.next()?.parse().ok()?;
                let size = parts.next()?.parse().ok()?;
                Some(Listing { index, size })
            })
            .collect();
        Ok(listings)
    }

    pub async fn retr(&mut self, index: u32) -> Result<Vec<u8>, VerifyError> {
        self.command(&format!("RETR {}", index)).await?;
        self.read_multiline().await
    }

    pub async fn quit(&mut self) -> Result<(), VerifyError> {
        let result = self.command("QUIT").await.map(|_| ());
        self.stream.shutdown().await;
        result
    }
}

/// POP3 backend: scans the newest messages for one from the expected sender.
/// The mailbox is left untouched.
pub struct Pop3Backend {
    config: Pop3Config,
    connector: Arc<dyn Connector>,
    poll: PollSettings,
    expected_sender: String,
}

impl Pop3Backend {
    pub fn new(
        config: Pop3Config,
        connector: Arc<dyn Connector>,
        poll: PollSettings,
        expected_sender: String,
    ) -> Self {
        Self {
            config,
            connector,
            poll,
            expected_sender,
        }
    }

    async fn poll_once(&self) -> Result<Option<CodeMatch>, VerifyError> {
        let stream = self
            .connector
            .connect(&self.config.server, self.config.port)
            .await?;
        let mut client = Pop3Client::start(stream).await?;

        let outcome = self.scan(&mut client).await;

        if let Err(e) = client.quit().await {
            debug!(error = %e, "POP3 QUIT did not complete cleanly");
        }
        outcome
    }

    async fn scan(&self, client: &mut Pop3Client) -> Result<Option<CodeMatch>, VerifyError> {
        client.login(&self.config.user, &self.config.pass).await?;

        let mut indexes: Vec<u32> = client.list().await?.iter().map(|l| l.index).collect();
        indexes.sort_unstable_by(|a, b| b.cmp(a));
        indexes.truncate(RECENT_WINDOW);
        debug!(candidates = indexes.len(), "POP3 listing done");

        let sender = self.expected_sender.to_lowercase();
        for index in indexes {
            let raw = client.retr(index).await?;
            let mail = match decode_message(&raw) {
                Ok(mail) => mail,
                Err(e) => {
                    warn!(index, error = %e, "skipping undecodable message");
                    continue;
                }
            };

            if !mail.from.to_lowercase().contains(&sender) {
                continue;
            }

            if let Some(code) = find_code(&mail.body) {
                info!(index, subject = %mail.subject, "✓ verification code found via POP3");
                return Ok(Some(CodeMatch {
                    code,
                    message: MailMessage {
                        sender: mail.from,
                        subject: mail.subject,
                        body: mail.body,
                        received_ref: MessageRef::Index(index),
                    },
                }));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl MailBackend for Pop3Backend {
    fn name(&self) -> &'static str {
        "pop3"
    }

    async fn fetch_code(&self, _recipient: &str) -> Result<Option<CodeMatch>, VerifyError> {
        for poll in 1..=self.poll.limit {
            if poll > 1 {
                tokio::time::sleep(self.poll.interval).await;
            }
            if let Some(found) = self.poll_once().await? {
                return Ok(Some(found));
            }
            debug!(poll, limit = self.poll.limit, "no verification mail yet");
        }
        Err(VerifyError::PollTimeout {
            polls: self.poll.limit,
        })
    }
}
