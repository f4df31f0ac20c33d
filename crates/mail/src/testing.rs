//! In-process fake mail servers for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;

use veriflow_core::VerifyError;

use crate::transport::{Connector, MailStream};

#[derive(Debug, Clone)]
struct StoredImapMessage {
    uid: u32,
    to: String,
    raw: Vec<u8>,
    seen: bool,
    deleted: bool,
    expunged: bool,
}

#[derive(Debug, Default)]
struct ImapState {
    messages: Vec<StoredImapMessage>,
    commands: Vec<String>,
    connections: u32,
    reject_login: bool,
    literal_size_override: Option<u64>,
}

/// Scripted IMAP server state shared between a test and its sessions.
#[derive(Clone, Default)]
pub struct FakeImap {
    state: Arc<Mutex<ImapState>>,
}

impl FakeImap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&self, uid: u32, to: &str, raw: &str) {
        self.state.lock().unwrap().messages.push(StoredImapMessage {
            uid,
            to: to.to_lowercase(),
            raw: raw.as_bytes().to_vec(),
            seen: false,
            deleted: false,
            expunged: false,
        });
    }

    pub fn reject_login(&self) {
        self.state.lock().unwrap().reject_login = true;
    }

    /// Announce this literal size on FETCH, send no body and hang up.
    pub fn announce_literal_size(&self, size: u64) {
        self.state.lock().unwrap().literal_size_override = Some(size);
    }

    fn message<T>(&self, uid: u32, f: impl Fn(&StoredImapMessage) -> T) -> T {
        let state = self.state.lock().unwrap();
        let msg = state.messages.iter().find(|m| m.uid == uid).unwrap();
        f(msg)
    }

    pub fn is_seen(&self, uid: u32) -> bool {
        self.message(uid, |m| m.seen)
    }

    pub fn is_deleted(&self, uid: u32) -> bool {
        self.message(uid, |m| m.deleted)
    }

    pub fn is_expunged(&self, uid: u32) -> bool {
        self.message(uid, |m| m.expunged)
    }

    /// Commands received so far, without tags.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn connections(&self) -> u32 {
        self.state.lock().unwrap().connections
    }

    fn respond(&self, tag: &str, command: &str) -> (Vec<u8>, bool) {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());
        let upper = command.to_ascii_uppercase();
        let mut out = Vec::new();
        let mut done = false;

        if upper.starts_with("LOGIN") {
            if state.reject_login {
                out.extend(format!("{} NO [AUTHENTICATIONFAILED] invalid credentials\r\n", tag).bytes());
            } else {
                out.extend(format!("{} OK LOGIN completed\r\n", tag).bytes());
            }
        } else if upper.starts_with("ID ") {
            out.extend(format!("* ID NIL\r\n{} OK ID completed\r\n", tag).bytes());
        } else if upper.starts_with("SELECT") {
            let exists = state.messages.iter().filter(|m| !m.expunged).count();
            out.extend(format!("* {} EXISTS\r\n{} OK [READ-WRITE] SELECT completed\r\n", exists, tag).bytes());
        } else if upper.starts_with("UID SEARCH TO ") {
            let addr = command[14..].trim_matches('"').to_lowercase();
            let uids: Vec<u32> = state
                .messages
                .iter()
                .filter(|m| !m.expunged && m.to == addr)
                .map(|m| m.uid)
                .collect();
            out.extend(search_reply(tag, &uids));
        } else if upper.starts_with("UID SEARCH ON ") {
            let uids: Vec<u32> = state
                .messages
                .iter()
                .filter(|m| !m.expunged && !m.seen)
                .map(|m| m.uid)
                .collect();
            out.extend(search_reply(tag, &uids));
        } else if upper.starts_with("UID FETCH ") {
            let uid: u32 = command[10..]
                .split_whitespace()
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let peek = upper.contains("BODY.PEEK[]");
            if let Some(size) = state.literal_size_override {
                out.extend(format!("* 1 FETCH (UID {} BODY[] {{{}}}\r\n", uid, size).bytes());
                return (out, true);
            }
            if let Some((seq, msg)) = state
                .messages
                .iter_mut()
                .filter(|m| !m.expunged)
                .enumerate()
                .find(|(_, m)| m.uid == uid)
            {
                if !peek {
                    msg.seen = true;
                }
                out.extend(format!("* {} FETCH (UID {} BODY[] {{{}}}\r\n", seq + 1, uid, msg.raw.len()).bytes());
                out.extend_from_slice(&msg.raw);
                out.extend(b")\r\n");
            }
            out.extend(format!("{} OK FETCH completed\r\n", tag).bytes());
        } else if upper.starts_with("UID STORE ") && upper.contains("\\DELETED") {
            let uid: u32 = command[10..]
                .split_whitespace()
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            if let Some((seq, msg)) = state
                .messages
                .iter_mut()
                .filter(|m| !m.expunged)
                .enumerate()
                .find(|(_, m)| m.uid == uid)
            {
                msg.deleted = true;
                out.extend(format!("* {} FETCH (UID {} FLAGS (\\Deleted))\r\n", seq + 1, uid).bytes());
            }
            out.extend(format!("{} OK STORE completed\r\n", tag).bytes());
        } else if upper == "EXPUNGE" {
            for msg in state.messages.iter_mut().filter(|m| m.deleted) {
                msg.expunged = true;
            }
            out.extend(format!("{} OK EXPUNGE completed\r\n", tag).bytes());
        } else if upper == "LOGOUT" {
            out.extend(format!("* BYE logging out\r\n{} OK LOGOUT completed\r\n", tag).bytes());
            done = true;
        } else {
            out.extend(format!("{} BAD unknown command\r\n", tag).bytes());
        }
        (out, done)
    }

    async fn serve(self, stream: DuplexStream) -> std::io::Result<()> {
        let (read, mut write) = tokio::io::split(stream);
        let mut reader = BufReader::new(read);
        write.write_all(b"* OK fake IMAP ready\r\n").await?;

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let line = line.trim_end();
            let Some((tag, command)) = line.split_once(' ') else {
                continue;
            };
            let (out, done) = self.respond(tag, command);
            write.write_all(&out).await?;
            if done {
                return Ok(());
            }
        }
    }
}

fn search_reply(tag: &str, uids: &[u32]) -> Vec<u8> {
    let mut line = String::from("* SEARCH");
    for uid in uids {
        line.push_str(&format!(" {}", uid));
    }
    format!("{}\r\n{} OK SEARCH completed\r\n", line, tag).into_bytes()
}

pub struct FakeImapConnector {
    server: FakeImap,
}

impl FakeImapConnector {
    pub fn new(server: FakeImap) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Connector for FakeImapConnector {
    async fn connect(&self, _host: &str, _port: u16) -> Result<Box<dyn MailStream>, VerifyError> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.server.state.lock().unwrap().connections += 1;
        let fake = self.server.clone();
        tokio::spawn(async move {
            let _ = fake.serve(server).await;
        });
        Ok(Box::new(client))
    }
}

#[derive(Debug, Default)]
struct Pop3State {
    messages: Vec<Vec<u8>>,
    retrieved: Vec<u32>,
    quits: u32,
    reject_login: bool,
}

/// Scripted POP3 maildrop. Messages are numbered from 1 in insertion order.
#[derive(Clone, Default)]
pub struct FakePop3 {
    state: Arc<Mutex<Pop3State>>,
}

impl FakePop3 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&self, raw: &str) {
        self.state.lock().unwrap().messages.push(raw.as_bytes().to_vec());
    }

    pub fn reject_login(&self) {
        self.state.lock().unwrap().reject_login = true;
    }

    pub fn retrieved(&self) -> Vec<u32> {
        self.state.lock().unwrap().retrieved.clone()
    }

    pub fn quits(&self) -> u32 {
        self.state.lock().unwrap().quits
    }

    fn respond(&self, command: &str) -> (Vec<u8>, bool) {
        let mut state = self.state.lock().unwrap();
        let upper = command.to_ascii_uppercase();
        let mut out = Vec::new();
        let mut done = false;

        if upper.starts_with("USER") {
            out.extend(b"+OK send PASS\r\n");
        } else if upper.starts_with("PASS") {
            if state.reject_login {
                out.extend(b"-ERR invalid password\r\n");
            } else {
                out.extend(b"+OK maildrop locked\r\n");
            }
        } else if upper == "LIST" {
            out.extend(format!("+OK {} messages\r\n", state.messages.len()).bytes());
            for (i, msg) in state.messages.iter().enumerate() {
                out.extend(format!("{} {}\r\n", i + 1, msg.len()).bytes());
            }
            out.extend(b".\r\n");
        } else if let Some(arg) = upper.strip_prefix("RETR ") {
            let index: usize = arg.trim().parse().unwrap_or(0);
            match state.messages.get(index.wrapping_sub(1)).cloned() {
                Some(raw) => {
                    state.retrieved.push(index as u32);
                    out.extend(b"+OK message follows\r\n");
                    for line in raw.split_inclusive(|b| *b == b'\n') {
                        if line.starts_with(b".") {
                            out.push(b'.');
                        }
                        out.extend_from_slice(line);
                    }
                    if !out.ends_with(b"\r\n") {
                        out.extend(b"\r\n");
                    }
                    out.extend(b".\r\n");
                }
                None => out.extend(b"-ERR no such message\r\n"),
            }
        } else if upper == "QUIT" {
            state.quits += 1;
            out.extend(b"+OK bye\r\n");
            done = true;
        } else {
            out.extend(b"-ERR unknown command\r\n");
        }
        (out, done)
    }

    async fn serve(self, stream: DuplexStream) -> std::io::Result<()> {
        let (read, mut write) = tokio::io::split(stream);
        let mut reader = BufReader::new(read);
        write.write_all(b"+OK fake POP3 ready\r\n").await?;

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let (out, done) = self.respond(line.trim_end());
            write.write_all(&out).await?;
            if done {
                return Ok(());
            }
        }
    }
}

pub struct FakePop3Connector {
    server: FakePop3,
}

impl FakePop3Connector {
    pub fn new(server: FakePop3) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Connector for FakePop3Connector {
    async fn connect(&self, _host: &str, _port: u16) -> Result<Box<dyn MailStream>, VerifyError> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let fake = self.server.clone();
        tokio::spawn(async move {
            let _ = fake.serve(server).await;
        });
        Ok(Box::new(client))
    }
}

/// A recorded HTTP request seen by [`FakeHttp`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug, Default)]
struct HttpState {
    routes: HashMap<(String, String), Vec<(u16, String)>>,
    requests: Vec<RecordedRequest>,
}

/// One-request-per-connection HTTP responder on a loopback port.
/// Each route answers with its queued responses in order, repeating the last.
#[derive(Clone)]
pub struct FakeHttp {
    state: Arc<Mutex<HttpState>>,
    base_url: String,
}

impl FakeHttp {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let fake = Self {
            state: Arc::new(Mutex::new(HttpState::default())),
            base_url: format!("http://{}", addr),
        };

        let server = fake.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let server = server.clone();
                tokio::spawn(async move {
                    let _ = server.handle(socket).await;
                });
            }
        });
        fake
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn route(&self, method: &str, path: &str, status: u16, body: &str) {
        self.state
            .lock()
            .unwrap()
            .routes
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push((status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    async fn handle(&self, socket: tokio::net::TcpStream) -> std::io::Result<()> {
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).await?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let target = parts.next().unwrap_or_default().to_string();

        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header).await? == 0 {
                break;
            }
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await?;

        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (target.clone(), String::new()),
        };
        let query = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();

        let (status, payload) = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(RecordedRequest {
                method: method.clone(),
                path: path.clone(),
                query,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
            match state.routes.get_mut(&(method, path)) {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) if !queue.is_empty() => queue[0].clone(),
                _ => (404, "{}".to_string()),
            }
        };

        let response = format!(
            "HTTP/1.1 {} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            payload.len(),
            payload
        );
        write.write_all(response.as_bytes()).await?;
        write.shutdown().await
    }
}
