//! IMAP mail source: raw IMAP4rev1 over rustls, blocking I/O run on the
//! tokio blocking pool.
//!
//! One session is opened lazily and reused for the whole batch; any error
//! drops it so the next call reconnects.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders, PartType};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::MailConfig;
use crate::error::MailError;
use crate::mail::{FetchedMessage, MailSource, MessageRef, Part, SearchFilter};

/// Nested `message/rfc822` parts deeper than this are dropped.
const MAX_PART_DEPTH: usize = 32;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

// ── Session ─────────────────────────────────────────────────────────

/// Tagged response to one command.
#[derive(Debug, Default)]
struct Response {
    /// Untagged and tagged lines, lossily decoded.
    lines: Vec<String>,
    /// Literal payloads (`{n}` blocks), in order.
    literals: Vec<Vec<u8>>,
}

struct ImapSession {
    reader: BufReader<TlsStream>,
    next_tag: u32,
    selected: Option<String>,
}

impl ImapSession {
    fn connect(config: &MailConfig) -> Result<Self, MailError> {
        let connect_err = |e: std::io::Error| MailError::Connect {
            host: config.imap_host.clone(),
            port: config.imap_port,
            reason: e.to_string(),
        };

        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port)).map_err(connect_err)?;
        tcp.set_read_timeout(Some(config.timeout))
            .map_err(connect_err)?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| MailError::Tls(format!("invalid server name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailError::Tls(e.to_string()))?;

        let mut session = Self {
            reader: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
            selected: None,
        };

        let greeting = session.read_line()?;
        if !String::from_utf8_lossy(&greeting).starts_with("* OK") {
            return Err(MailError::Protocol(format!(
                "unexpected greeting: {}",
                String::from_utf8_lossy(&greeting).trim_end()
            )));
        }

        let login = format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        );
        session
            .command(&login)
            .map_err(|_| MailError::Auth {
                username: config.username.clone(),
            })?;

        info!(host = %config.imap_host, "IMAP session opened");
        Ok(session)
    }

    fn read_line(&mut self) -> Result<Vec<u8>, MailError> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailError::Protocol("IMAP connection closed".into()));
        }
        Ok(buf)
    }

    /// Send one command and collect its response up to the tagged status line.
    fn command(&mut self, cmd: &str) -> Result<Response, MailError> {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;

        let stream = self.reader.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.reader.read_exact(&mut literal)?;
                response.literals.push(literal);
                response.lines.push(String::from_utf8_lossy(&line).into_owned());
                continue;
            }

            let text = String::from_utf8_lossy(&line).into_owned();
            let done = text.starts_with(&format!("{tag} "));
            response.lines.push(text);
            if done {
                break;
            }
        }

        let status = response.lines.last().map(String::as_str).unwrap_or_default();
        if status.split_whitespace().nth(1) != Some("OK") {
            let shown = if cmd.starts_with("LOGIN") { "LOGIN" } else { cmd };
            return Err(MailError::Protocol(format!(
                "{shown} failed: {}",
                status.trim_end()
            )));
        }
        Ok(response)
    }

    fn select(&mut self, mailbox: &str) -> Result<(), MailError> {
        if self.selected.as_deref() == Some(mailbox) {
            return Ok(());
        }
        self.command(&format!("SELECT {}", quote(mailbox)))?;
        self.selected = Some(mailbox.to_string());
        Ok(())
    }

    fn search_text(&mut self, text: &str) -> Result<Vec<String>, MailError> {
        let response = self.command(&search_command(text))?;
        Ok(parse_search_response(&response.lines))
    }

    fn fetch_rfc822(&mut self, uid: &str) -> Result<Vec<u8>, MailError> {
        let mut response = self.command(&fetch_command(uid)?)?;
        response
            .literals
            .pop()
            .ok_or_else(|| MailError::Protocol(format!("no message body returned for uid {uid}")))
    }

    fn logout(&mut self) -> Result<(), MailError> {
        self.command("LOGOUT").map(|_| ())
    }
}

// ── Mail source ─────────────────────────────────────────────────────

/// `MailSource` backed by an IMAP mailbox.
pub struct ImapMailSource {
    config: MailConfig,
    session: Arc<Mutex<Option<ImapSession>>>,
}

impl ImapMailSource {
    pub fn new(config: MailConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `f` against the (lazily opened) session on the blocking pool.
    async fn with_session<T, F>(&self, f: F) -> Result<T, MailError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, MailError> + Send + 'static,
    {
        let config = self.config.clone();
        let session = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| MailError::Task("IMAP session lock poisoned".into()))?;
            if guard.is_none() {
                *guard = Some(ImapSession::connect(&config)?);
            }
            let Some(active) = guard.as_mut() else {
                return Err(MailError::Task("IMAP session unavailable".into()));
            };

            let result = f(active);
            if result.is_err() {
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| MailError::Task(e.to_string()))?
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<MessageRef>, MailError> {
        let filter = filter.clone();
        let uids = self
            .with_session(move |session| {
                session.select(&filter.mailbox)?;
                session.search_text(&filter.text)
            })
            .await?;

        debug!(count = uids.len(), "IMAP search complete");
        Ok(uids.into_iter().map(MessageRef).collect())
    }

    async fn fetch(&self, message: &MessageRef) -> Result<FetchedMessage, MailError> {
        let uid = message.0.clone();
        let raw = self
            .with_session(move |session| session.fetch_rfc822(&uid))
            .await?;
        parse_rfc822(message.as_str(), &raw)
    }

    async fn close(&self) -> Result<(), MailError> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| MailError::Task("IMAP session lock poisoned".into()))?;
            match guard.take() {
                Some(mut active) => active.logout(),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| MailError::Task(e.to_string()))?
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Quote a string for use as an IMAP `quoted` argument.
pub fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// `UID SEARCH` for messages containing `text` anywhere.
pub fn search_command(text: &str) -> String {
    format!("UID SEARCH TEXT {}", quote(text))
}

/// `UID FETCH` of the whole message, without setting `\Seen`.
pub fn fetch_command(uid: &str) -> Result<String, MailError> {
    if uid.is_empty() || !uid.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MailError::Protocol(format!("invalid message uid: {uid:?}")));
    }
    Ok(format!("UID FETCH {uid} BODY.PEEK[]"))
}

/// Length of the literal announced at the end of a response line (`... {123}\r\n`).
pub fn literal_len(line: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(line).ok()?.trim_end();
    let inner = text.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

/// Collect message identifiers from `* SEARCH` lines.
pub fn parse_search_response(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(str::to_string))
        .collect()
}

/// Parse a raw RFC 822 message into headers and a `Part` tree.
pub fn parse_rfc822(id: &str, raw: &[u8]) -> Result<FetchedMessage, MailError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::Parse { id: id.to_string() })?;

    let mut fetched = FetchedMessage {
        body: convert_part(&parsed, 0, 0),
        ..Default::default()
    };

    if let Some(from) = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
    {
        fetched.headers.insert("from".into(), from.to_string());
    }
    if let Some(subject) = parsed.subject() {
        fetched.headers.insert("subject".into(), subject.to_string());
    }
    if let Some(message_id) = parsed.message_id() {
        fetched
            .headers
            .insert("message-id".into(), message_id.to_string());
    }
    if let Some(date) = parsed.date() {
        fetched.headers.insert("date".into(), date.to_rfc3339());
    }

    Ok(fetched)
}

fn convert_part(message: &mail_parser::Message<'_>, index: usize, depth: usize) -> Part {
    let Some(part) = message.parts.get(index) else {
        return Part::default();
    };
    if depth > MAX_PART_DEPTH {
        return Part::default();
    }

    let declared = MimeHeaders::content_type(part).map(|ct| match ct.subtype() {
        Some(sub) => format!("{}/{}", ct.ctype(), sub),
        None => ct.ctype().to_string(),
    });
    let is_attachment = MimeHeaders::content_disposition(part)
        .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"))
        || MimeHeaders::attachment_name(part).is_some();

    let (fallback_type, inline_data, children) = match &part.body {
        PartType::Text(text) => ("text/plain", Some(text.as_bytes().to_vec()), Vec::new()),
        PartType::Html(html) => ("text/html", Some(html.as_bytes().to_vec()), Vec::new()),
        PartType::Binary(data) | PartType::InlineBinary(data) => {
            ("application/octet-stream", Some(data.to_vec()), Vec::new())
        }
        PartType::Message(nested) => (
            "message/rfc822",
            None,
            vec![convert_part(nested, 0, depth + 1)],
        ),
        PartType::Multipart(ids) => (
            "multipart/mixed",
            None,
            ids.iter()
                .map(|id| convert_part(message, *id as usize, depth + 1))
                .collect(),
        ),
    };

    Part {
        inline_data,
        is_attachment,
        content_type: declared
            .unwrap_or_else(|| fallback_type.to_string())
            .to_ascii_lowercase(),
        children,
    }
}
