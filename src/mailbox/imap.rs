//! IMAP client over [`ImapStream`].
//!
//! One command in flight at a time: each method writes a tagged command and
//! reads until the matching tagged completion.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::MailboxError;
use crate::mailbox::protocol::{self, Literal, Response, Status};
use crate::mailbox::stream::ImapStream;
use crate::mailbox::{MailboxConnector, MailboxSession, MailboxStatus, normalize_search_results};

/// Upper bound on connecting, greeting and LOGIN together.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long LOGOUT may take before the socket is simply dropped.
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens [`ImapSession`]s.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    timeout: Duration,
}

impl ImapConnector {
    pub fn new() -> Self {
        Self {
            timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ImapConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self, config: &RelayConfig) -> Result<Box<dyn MailboxSession>, MailboxError> {
        let session = tokio::time::timeout(self.timeout, ImapSession::connect(config))
            .await
            .map_err(|_| MailboxError::Timeout {
                stage: "connecting and logging in",
                secs: self.timeout.as_secs(),
            })??;
        Ok(Box::new(session))
    }
}

/// A command argument.
enum Arg<'a> {
    /// Sent verbatim (sequence sets, item lists).
    Raw(String),
    /// Sent as a quoted string, or a literal when quoting is impossible.
    AString(&'a str),
}

/// Untagged responses plus the tagged completion text.
struct Completion {
    untagged: Vec<Response>,
    tagged: String,
}

/// An authenticated IMAP connection.
pub struct ImapSession {
    stream: BufReader<ImapStream>,
    tag_counter: u32,
    selected: Option<String>,
}

impl ImapSession {
    /// Connect, read the greeting, and log in unless pre-authenticated.
    pub async fn connect(config: &RelayConfig) -> Result<Self, MailboxError> {
        let started = Instant::now();
        let stream = ImapStream::connect(&config.host, config.port, config.tls).await?;
        debug!(
            host = %config.host,
            port = config.port,
            tls = stream.is_tls(),
            "IMAP transport established"
        );

        let mut session = Self {
            stream: BufReader::new(stream),
            tag_counter: 0,
            selected: None,
        };

        let greeting = session.read_response().await?;
        let preauth = match greeting
            .text
            .strip_prefix("* ")
            .and_then(protocol::parse_status)
        {
            Some((Status::Ok, _)) => false,
            Some((Status::PreAuth, _)) => true,
            Some((Status::Bye, rest)) => return Err(MailboxError::Closed(rest.to_string())),
            _ => {
                return Err(MailboxError::Protocol(format!(
                    "unexpected greeting: {}",
                    greeting.text
                )));
            }
        };

        if !preauth {
            let password = config.password.expose_secret();
            session
                .command("LOGIN", &[Arg::AString(&config.user), Arg::AString(password)])
                .await
                .map_err(|e| match e {
                    MailboxError::CommandFailed { response, .. } => MailboxError::AuthFailed {
                        user: config.user.clone(),
                        reason: response,
                    },
                    other => other,
                })?;
        }

        info!(
            host = %config.host,
            user = %config.user,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "IMAP session authenticated"
        );
        Ok(session)
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{:04}", self.tag_counter)
    }

    /// Read one response, pulling in any literals it announces.
    async fn read_response(&mut self) -> Result<Response, MailboxError> {
        let mut response = Response::default();
        loop {
            let buf = read_line(&mut self.stream, protocol::MAX_LINE_LEN).await?;
            let line = String::from_utf8_lossy(&buf);
            response.text.push_str(&line);

            let Some(len) = protocol::literal_len(&line) else {
                return Ok(response);
            };
            if len > protocol::MAX_LITERAL_LEN {
                return Err(MailboxError::Protocol(format!(
                    "literal of {len} bytes exceeds limit"
                )));
            }
            let marker_at = response.text.rfind('{').unwrap_or(response.text.len());
            let mut data = vec![0u8; len];
            self.stream.read_exact(&mut data).await?;
            response.literals.push(Literal { marker_at, data });
        }
    }

    async fn write_flush(&mut self, bytes: &[u8]) -> Result<(), MailboxError> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Send a tagged command and collect responses until its completion.
    ///
    /// Arguments are never logged; LOGIN carries the password.
    async fn command(
        &mut self,
        name: &'static str,
        args: &[Arg<'_>],
    ) -> Result<Completion, MailboxError> {
        let tag = self.next_tag();
        debug!(tag = %tag, command = name, "IMAP command");

        let mut untagged = Vec::new();
        let mut pending = format!("{tag} {name}").into_bytes();
        for arg in args {
            pending.push(b' ');
            match arg {
                Arg::Raw(raw) => pending.extend_from_slice(raw.as_bytes()),
                Arg::AString(value) => match protocol::quote(value) {
                    Some(quoted) => pending.extend_from_slice(quoted.as_bytes()),
                    None => {
                        pending.extend_from_slice(format!("{{{}}}\r\n", value.len()).as_bytes());
                        self.write_flush(&pending).await?;
                        pending.clear();
                        self.await_continuation(&tag, name, &mut untagged).await?;
                        pending.extend_from_slice(value.as_bytes());
                    }
                },
            }
        }
        pending.extend_from_slice(b"\r\n");
        self.write_flush(&pending).await?;

        loop {
            let response = self.read_response().await?;
            if let Some(tagged) = tagged_text(&response.text, &tag) {
                let tagged = tagged.to_string();
                return match protocol::parse_status(&tagged) {
                    Some((Status::Ok, rest)) => Ok(Completion {
                        untagged,
                        tagged: rest.to_string(),
                    }),
                    _ => Err(MailboxError::CommandFailed {
                        command: name,
                        response: tagged,
                    }),
                };
            }
            untagged.push(response);
        }
    }

    /// Wait for `+` after announcing a literal.
    async fn await_continuation(
        &mut self,
        tag: &str,
        name: &'static str,
        untagged: &mut Vec<Response>,
    ) -> Result<(), MailboxError> {
        loop {
            let response = self.read_response().await?;
            if response.text.starts_with('+') {
                return Ok(());
            }
            if let Some(tagged) = tagged_text(&response.text, tag) {
                return Err(MailboxError::CommandFailed {
                    command: name,
                    response: tagged.to_string(),
                });
            }
            untagged.push(response);
        }
    }

    fn require_selected(&self) -> Result<(), MailboxError> {
        match self.selected {
            Some(_) => Ok(()),
            None => Err(MailboxError::NotSelected),
        }
    }
}

fn tagged_text<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    text.strip_prefix(tag)?.strip_prefix(' ')
}

#[async_trait]
impl MailboxSession for ImapSession {
    async fn open_folder(&mut self, folder: &str) -> Result<MailboxStatus, MailboxError> {
        let completion = self
            .command("SELECT", &[Arg::AString(folder)])
            .await
            .map_err(|e| match e {
                MailboxError::CommandFailed { response, .. } => MailboxError::FolderUnavailable {
                    folder: folder.to_string(),
                    reason: response,
                },
                other => other,
            })?;

        let info = protocol::parse_select(&completion.untagged, &completion.tagged);
        let unsupported = |reason: &str| MailboxError::Unsupported {
            folder: folder.to_string(),
            reason: reason.to_string(),
        };

        if info.uid_not_sticky {
            return Err(unsupported("server does not keep UIDs between sessions"));
        }
        let uid_validity = info
            .uid_validity
            .ok_or_else(|| unsupported("server did not report UIDVALIDITY"))?;
        let uid_next = info
            .uid_next
            .ok_or_else(|| unsupported("server did not report UIDNEXT"))?;

        if info.read_only {
            warn!(folder, "Folder opened read-only; messages cannot be marked as read");
        }

        self.selected = Some(folder.to_string());
        let status = MailboxStatus {
            uid_next,
            uid_validity,
            exists: info.exists.unwrap_or(0),
            read_only: info.read_only,
        };
        debug!(
            folder,
            uid_next, uid_validity,
            exists = status.exists,
            "Folder selected"
        );
        Ok(status)
    }

    async fn search_from_uid(&mut self, lower_bound: u32) -> Result<Vec<u32>, MailboxError> {
        self.require_selected()?;
        // UID 0 is not a valid sequence-set member.
        let lower_bound = lower_bound.max(1);
        let completion = self
            .command("UID SEARCH", &[Arg::Raw(format!("UID {lower_bound}:*"))])
            .await?;
        let uids = normalize_search_results(protocol::parse_search(&completion.untagged), lower_bound);
        debug!(lower_bound, found = uids.len(), "UID search complete");
        Ok(uids)
    }

    async fn fetch_content(&mut self, uid: u32) -> Result<Option<Vec<u8>>, MailboxError> {
        self.require_selected()?;
        let completion = self
            .command("UID FETCH", &[Arg::Raw(format!("{uid} BODY.PEEK[]"))])
            .await?;
        let body = protocol::fetch_body(&completion.untagged, uid);
        debug!(uid, bytes = body.as_ref().map(Vec::len), "Message fetched");
        Ok(body)
    }

    async fn mark_read(&mut self, uid: u32) -> Result<(), MailboxError> {
        self.require_selected()?;
        self.command("UID STORE", &[Arg::Raw(format!("{uid} +FLAGS.SILENT (\\Seen)"))])
            .await?;
        Ok(())
    }

    async fn disconnect(mut self: Box<Self>) {
        let started = Instant::now();
        match tokio::time::timeout(LOGOUT_TIMEOUT, self.command("LOGOUT", &[])).await {
            Ok(Ok(_)) => {}
            // Servers often close straight after the untagged BYE.
            Ok(Err(MailboxError::Closed(_))) => {}
            Ok(Err(e)) => warn!(error = %e, "IMAP logout failed"),
            Err(_) => warn!(secs = LOGOUT_TIMEOUT.as_secs(), "IMAP logout timed out"),
        }
        if let Err(e) = self.stream.get_mut().shutdown().await {
            debug!(error = %e, "IMAP socket shutdown failed");
        }
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "IMAP session closed"
        );
    }
}

/// Read one CRLF-terminated line of at most `limit` bytes, without the
/// line ending.
async fn read_line<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>, MailboxError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = reader.take(limit as u64).read_until(b'\n', &mut buf).await?;
    if !buf.ends_with(b"\n") {
        if n == limit {
            return Err(MailboxError::Protocol(format!(
                "response line exceeds {limit} bytes"
            )));
        }
        return Err(MailboxError::Closed("connection closed mid-response".into()));
    }
    buf.pop();
    if buf.ends_with(b"\r") {
        buf.pop();
    }
    Ok(buf)
}
