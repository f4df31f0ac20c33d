//! IMAP backend: searches the mailbox for the verification mail, deletes it
//! once the code is read.

use std::sync::Arc;

use async_imap::error::Error as ImapError;
use async_imap::types::Fetch;
use async_imap::Session;
use async_trait::async_trait;
use futures::TryStreamExt;
use tracing::{debug, info, warn};

use veriflow_core::config::ImapConfig;
use veriflow_core::{CodeMatch, MailMessage, MessageRef, VerifyError};

use crate::backend::{MailBackend, PollSettings};
use crate::extract::find_code;
use crate::mime::decode_message;
use crate::transport::{Connector, MailStream};

type ImapSession = Session<Box<dyn MailStream>>;

/// Socket-level failures are worth another poll; refusals and parse
/// failures are not.
fn imap_error(err: ImapError) -> VerifyError {
    match err {
        ImapError::Io(e) => VerifyError::Transport(format!("IMAP I/O failed: {}", e)),
        ImapError::ConnectionLost => VerifyError::Transport("IMAP connection lost".into()),
        other => VerifyError::Protocol(format!("IMAP: {}", other)),
    }
}

/// Quoted string for search criteria and the ID parameter list.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

pub struct ImapBackend {
    config: ImapConfig,
    connector: Arc<dyn Connector>,
    poll: PollSettings,
    id_handshake_domains: Vec<String>,
}

impl ImapBackend {
    pub fn new(
        config: ImapConfig,
        connector: Arc<dyn Connector>,
        poll: PollSettings,
        id_handshake_domains: Vec<String>,
    ) -> Self {
        Self {
            config,
            connector,
            poll,
            id_handshake_domains,
        }
    }

    /// Some providers refuse SEARCH until the client identifies itself.
    fn needs_id_handshake(&self) -> bool {
        let Some((_, domain)) = self.config.user.rsplit_once('@') else {
            return false;
        };
        self.id_handshake_domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain))
    }

    async fn connect_and_login(&self) -> Result<ImapSession, VerifyError> {
        let stream = self
            .connector
            .connect(&self.config.server, self.config.port)
            .await?;

        let mut client = async_imap::Client::new(stream);
        client
            .read_response()
            .await
            .transpose()
            .map_err(|e| VerifyError::Transport(format!("IMAP greeting failed: {}", e)))?
            .ok_or_else(|| VerifyError::Transport("IMAP server sent no greeting".into()))?;

        let session = client
            .login(&self.config.user, &self.config.pass)
            .await
            .map_err(|(e, _client)| VerifyError::Transport(format!("IMAP login rejected: {}", e)))?;
        debug!(server = %self.config.server, "IMAP session opened");
        Ok(session)
    }

    /// One connection: login, search, scan newest-first, log out.
    async fn poll_once(&self, recipient: &str) -> Result<Option<CodeMatch>, VerifyError> {
        let mut session = self.connect_and_login().await?;

        let outcome = self.scan_mailbox(&mut session, recipient).await;

        if let Err(e) = session.logout().await {
            debug!(error = %e, "IMAP logout did not complete cleanly");
        }
        outcome
    }

    async fn send_id(&self, session: &mut ImapSession) -> Result<(), VerifyError> {
        let name = self.config.user.split('@').next().unwrap_or_default();
        let params = [
            ("name", name),
            ("contact", self.config.user.as_str()),
            ("version", "1.0.0"),
            ("vendor", "veriflow"),
        ]
        .iter()
        .flat_map(|(k, v)| [quote(k), quote(v)])
        .collect::<Vec<_>>()
        .join(" ");

        session
            .run_command_and_check_ok(format!("ID ({})", params))
            .await
            .map_err(imap_error)
    }

    async fn scan_mailbox(
        &self,
        session: &mut ImapSession,
        recipient: &str,
    ) -> Result<Option<CodeMatch>, VerifyError> {
        let by_date = self.needs_id_handshake();
        if by_date {
            self.send_id(session).await?;
        }

        session.select(&self.config.mailbox).await.map_err(imap_error)?;

        let criteria = if by_date {
            let today = chrono::Local::now().format("%d-%b-%Y");
            format!("ON {} UNSEEN", today)
        } else {
            format!("TO {}", quote(recipient))
        };
        let mut uids: Vec<u32> = session
            .uid_search(&criteria)
            .await
            .map_err(imap_error)?
            .into_iter()
            .collect();
        uids.sort_unstable();
        debug!(candidates = uids.len(), criteria = %criteria, "IMAP search done");

        for uid in uids.into_iter().rev() {
            // BODY.PEEK keeps \Seen untouched on messages we pass over.
            let fetches: Vec<Fetch> = session
                .uid_fetch(uid.to_string(), "BODY.PEEK[]")
                .await
                .map_err(imap_error)?
                .try_collect()
                .await
                .map_err(imap_error)?;
            let Some(raw) = fetches.iter().find_map(|f| f.body()) else {
                continue;
            };

            let mail = match decode_message(raw) {
                Ok(mail) => mail,
                Err(e) => {
                    warn!(uid, error = %e, "skipping undecodable message");
                    continue;
                }
            };

            // Date search is coarser than address search.
            if by_date && !mail.is_addressed_to(recipient) {
                continue;
            }

            let Some(code) = find_code(&mail.body) else {
                continue;
            };

            info!(uid, subject = %mail.subject, "✓ verification code found via IMAP");
            if let Err(e) = self.delete(session, uid).await {
                warn!(uid, error = %e, "failed to delete verification mail");
            }

            return Ok(Some(CodeMatch {
                code,
                message: MailMessage {
                    sender: mail.from,
                    subject: mail.subject,
                    body: mail.body,
                    received_ref: MessageRef::Uid(uid),
                },
            }));
        }

        Ok(None)
    }

    async fn delete(&self, session: &mut ImapSession, uid: u32) -> Result<(), VerifyError> {
        let _: Vec<Fetch> = session
            .uid_store(uid.to_string(), "+FLAGS (\\Deleted)")
            .await
            .map_err(imap_error)?
            .try_collect()
            .await
            .map_err(imap_error)?;
        let _: Vec<u32> = session
            .expunge()
            .await
            .map_err(imap_error)?
            .try_collect()
            .await
            .map_err(imap_error)?;
        Ok(())
    }
}

#[async_trait]
impl MailBackend for ImapBackend {
    fn name(&self) -> &'static str {
        "imap"
    }

    async fn fetch_code(&self, recipient: &str) -> Result<Option<CodeMatch>, VerifyError> {
        for poll in 1..=self.poll.limit {
            if poll > 1 {
                tokio::time::sleep(self.poll.interval).await;
            }
            if let Some(found) = self.poll_once(recipient).await? {
                return Ok(Some(found));
            }
            debug!(poll, limit = self.poll.limit, "no verification mail yet");
        }
        Err(VerifyError::PollTimeout {
            polls: self.poll.limit,
        })
    }
}
