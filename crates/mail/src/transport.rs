//! Connection setup for the mail protocols, plus CRLF framing for POP3.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use veriflow_core::VerifyError;

/// Async read+write stream marker. `Debug` is required by `async_imap`.
pub trait MailStream: AsyncRead + AsyncWrite + Unpin + Send + Debug {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + Debug> MailStream for T {}

/// Opens one transport connection per poll.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn MailStream>, VerifyError>;
}

/// Implicit TLS (IMAPS on 993, POP3S on 995) with the webpki root set.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    pub fn new() -> Result<Self, VerifyError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| VerifyError::Config(format!("TLS setup failed: {}", e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn MailStream>, VerifyError> {
        let tcp = TcpStream::connect((host, port)).await?;
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| VerifyError::Config(format!("invalid server name '{}': {}", host, e)))?;
        let tls = self.inner.connect(server_name, tcp).await?;
        debug!(host, port, "TLS connection established");
        Ok(Box::new(tls))
    }
}

/// CRLF line framing over a boxed stream for the POP3 client.
pub struct LineStream {
    reader: BufReader<tokio::io::ReadHalf<Box<dyn MailStream>>>,
    writer: tokio::io::WriteHalf<Box<dyn MailStream>>,
}

impl LineStream {
    pub fn new(stream: Box<dyn MailStream>) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    /// Read one line with the trailing CRLF removed.
    pub async fn read_line(&mut self) -> Result<String, VerifyError> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(VerifyError::Transport("connection closed by server".into()));
        }
        while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
            buf.pop();
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read a line keeping its raw bytes and terminator.
    pub async fn read_raw_line(&mut self) -> Result<Vec<u8>, VerifyError> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(VerifyError::Transport("connection closed by server".into()));
        }
        Ok(buf)
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), VerifyError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}
