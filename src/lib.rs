//! IMAP relay: forwards new mail from an IMAP folder to a chat webhook.

pub mod channels;
pub mod config;
pub mod error;
pub mod filter;
pub mod mailbox;
pub mod store;
pub mod sync;
