//! In-memory collaborators for sync tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::channels::{Notification, NotificationSender};
use crate::config::RelayConfig;
use crate::error::{DeliveryError, MailboxError};
use crate::mailbox::{MailboxConnector, MailboxSession, MailboxStatus};
use crate::sync::RemainingTime;

pub fn relay_config() -> RelayConfig {
    RelayConfig {
        host: "imap.example.com".into(),
        port: 993,
        tls: true,
        user: "relay@example.com".into(),
        password: SecretString::from("secret".to_string()),
        folder: "INBOX".into(),
        webhook_url: "https://discord.com/api/webhooks/1/token".into(),
        allow_list: Vec::new(),
        deny_list: Vec::new(),
        glossary: Default::default(),
        skip_existing: false,
    }
}

pub fn raw_message(from: &str, subject: &str) -> Vec<u8> {
    format!("From: {from}\r\nSubject: {subject}\r\n\r\nHello from {from}.\r\n").into_bytes()
}

#[derive(Debug, Default)]
pub struct MailboxState {
    pub status: Option<MailboxStatus>,
    pub search_results: Vec<u32>,
    pub messages: HashMap<u32, Vec<u8>>,
    pub fail_connect: bool,
    pub fail_open: bool,
    pub fail_mark: bool,
    /// UID whose fetch fails.
    pub fail_fetch: Option<u32>,

    pub connects: usize,
    pub disconnects: usize,
    pub searches: Vec<u32>,
    pub fetched: Vec<u32>,
    pub marked: Vec<u32>,
}

/// A scripted mailbox. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl FakeMailbox {
    pub fn new(uid_next: u32, uid_validity: u32) -> Self {
        let mailbox = Self::default();
        mailbox.with(|s| {
            s.status = Some(MailboxStatus {
                uid_next,
                uid_validity,
                exists: 0,
                read_only: false,
            })
        });
        mailbox
    }

    /// Add a message that search will report.
    pub fn add(&self, uid: u32, from: &str) {
        self.with(|s| {
            s.search_results.push(uid);
            s.messages.insert(uid, raw_message(from, &format!("Message {uid}")));
        });
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MailboxState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }
}

#[async_trait]
impl MailboxConnector for FakeMailbox {
    async fn connect(&self, config: &RelayConfig) -> Result<Box<dyn MailboxSession>, MailboxError> {
        self.with(|s| {
            if s.fail_connect {
                return Err(MailboxError::Connect {
                    host: config.host.clone(),
                    port: config.port,
                    reason: "connection refused".into(),
                });
            }
            s.connects += 1;
            Ok(())
        })?;
        Ok(Box::new(FakeSession {
            mailbox: self.clone(),
        }))
    }
}

struct FakeSession {
    mailbox: FakeMailbox,
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn open_folder(&mut self, folder: &str) -> Result<MailboxStatus, MailboxError> {
        self.mailbox.with(|s| {
            if s.fail_open {
                return Err(MailboxError::Unsupported {
                    folder: folder.to_string(),
                    reason: "server does not keep UIDs between sessions".into(),
                });
            }
            s.status.ok_or(MailboxError::FolderUnavailable {
                folder: folder.to_string(),
                reason: "no such folder".into(),
            })
        })
    }

    /// Returns the scripted results as-is, like a server that ignores the
    /// lower bound for the newest message.
    async fn search_from_uid(&mut self, lower_bound: u32) -> Result<Vec<u32>, MailboxError> {
        self.mailbox.with(|s| {
            s.searches.push(lower_bound);
            Ok(s.search_results.clone())
        })
    }

    async fn fetch_content(&mut self, uid: u32) -> Result<Option<Vec<u8>>, MailboxError> {
        self.mailbox.with(|s| {
            s.fetched.push(uid);
            if s.fail_fetch == Some(uid) {
                return Err(MailboxError::CommandFailed {
                    command: "UID FETCH",
                    response: "NO [SERVERBUG] internal error".into(),
                });
            }
            Ok(s.messages.get(&uid).cloned())
        })
    }

    async fn mark_read(&mut self, uid: u32) -> Result<(), MailboxError> {
        self.mailbox.with(|s| {
            if s.fail_mark {
                return Err(MailboxError::CommandFailed {
                    command: "UID STORE",
                    response: "NO read-only".into(),
                });
            }
            s.marked.push(uid);
            Ok(())
        })
    }

    async fn disconnect(self: Box<Self>) {
        self.mailbox.with(|s| s.disconnects += 1);
    }
}

/// Records notifications instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<Notification>>,
    pub fail: bool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, _webhook_url: &str, notification: &Notification) -> Result<(), DeliveryError> {
        if self.fail {
            return Err(DeliveryError::Rejected {
                status: 500,
                body: "upstream error".into(),
            });
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Plenty of time for the first `checks` deadline checks, none after.
#[derive(Debug)]
pub struct CountdownClock {
    checks: usize,
    calls: AtomicUsize,
}

impl CountdownClock {
    pub fn new(checks: usize) -> Self {
        Self {
            checks,
            calls: AtomicUsize::new(0),
        }
    }
}

impl RemainingTime for CountdownClock {
    fn remaining(&self) -> Duration {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.checks {
            Duration::from_secs(3600)
        } else {
            Duration::from_secs(10)
        }
    }
}
