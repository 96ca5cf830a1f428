//! Error types for the relay.

/// Top-level error type for a sync invocation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Sync did not finish within its {secs}s time budget")]
    BudgetExceeded { secs: u64 },
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration file {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Checkpoint persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Corrupt checkpoint record: {0}")]
    Corrupt(String),
}

/// IMAP session errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS handshake with {host} failed: {reason}")]
    Tls { host: String, reason: String },

    #[error("Timed out after {secs}s while {stage}")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("Authentication failed for {user}: {reason}")]
    AuthFailed { user: String, reason: String },

    #[error("Cannot open folder {folder}: {reason}")]
    FolderUnavailable { folder: String, reason: String },

    #[error("Folder {folder} is not supported: {reason}")]
    Unsupported { folder: String, reason: String },

    #[error("{command} failed: {response}")]
    CommandFailed {
        command: &'static str,
        response: String,
    },

    #[error("Server closed the connection: {0}")]
    Closed(String),

    #[error("Malformed server response: {0}")]
    Protocol(String),

    #[error("No folder is selected")]
    NotSelected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Webhook delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Invalid webhook URL: \"{0}\"")]
    InvalidWebhookUrl(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Webhook rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
