pub mod backend;
pub mod extract;
pub mod fetcher;
pub mod imap;
pub mod mime;
pub mod pop3;
pub mod tempmail;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Backend, MailBackend, PollSettings};
pub use fetcher::VerificationCodeFetcher;
pub use imap::ImapBackend;
pub use pop3::Pop3Backend;
pub use tempmail::TempMailBackend;
pub use transport::{Connector, TlsConnector};
