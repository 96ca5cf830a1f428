//! Mailbox client abstraction.
//!
//! The sync core only ever talks to these two traits. Each call suspends
//! until the server's single expected answer arrives; nothing is pipelined.
//! [`imap::ImapConnector`] is the real implementation.

pub mod imap;
pub mod message;
pub mod protocol;
pub mod stream;

use async_trait::async_trait;

use crate::config::RelayConfig;
use crate::error::MailboxError;

pub use imap::{ImapConnector, ImapSession};
pub use message::{Attachment, ParsedEmail};

/// Identity and bounds of a freshly opened folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStatus {
    /// First UID the server has not yet assigned.
    pub uid_next: u32,
    /// UID numbering epoch.
    pub uid_validity: u32,
    /// Message count at open time.
    pub exists: u32,
    /// The server opened the folder without write access.
    pub read_only: bool,
}

/// Opens authenticated sessions against the configured mail store.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// Connect and log in. Fails on network, TLS, timeout, or auth errors.
    async fn connect(&self, config: &RelayConfig) -> Result<Box<dyn MailboxSession>, MailboxError>;
}

/// An authenticated session. Owned exclusively by one invocation.
#[async_trait]
pub trait MailboxSession: Send {
    /// Open `folder` read-write. Rejects folders without persistent UIDs.
    async fn open_folder(&mut self, folder: &str) -> Result<MailboxStatus, MailboxError>;

    /// UIDs `>= lower_bound`, ascending and unique.
    async fn search_from_uid(&mut self, lower_bound: u32) -> Result<Vec<u32>, MailboxError>;

    /// Raw RFC 5322 bytes of `uid`, without setting `\Seen`.
    /// `None` if the message no longer exists.
    async fn fetch_content(&mut self, uid: u32) -> Result<Option<Vec<u8>>, MailboxError>;

    /// Set `\Seen` on `uid`.
    async fn mark_read(&mut self, uid: u32) -> Result<(), MailboxError>;

    /// Log out and close. Never fails; problems are logged.
    async fn disconnect(self: Box<Self>);
}

/// Clean up a `UID SEARCH UID n:*` result.
///
/// `n:*` is evaluated as `*:n` when `n` exceeds the highest UID, so the
/// server returns the newest message even though it is below the requested
/// bound. Server ordering is not trusted either.
pub fn normalize_search_results(mut uids: Vec<u32>, lower_bound: u32) -> Vec<u32> {
    uids.retain(|&uid| uid >= lower_bound);
    uids.sort_unstable();
    uids.dedup();
    uids
}
