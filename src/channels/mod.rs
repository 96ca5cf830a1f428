//! Outbound notifications.

pub mod discord;
pub mod format;

use async_trait::async_trait;

use crate::error::DeliveryError;

pub use discord::DiscordWebhook;
pub use format::build_notification;

/// A file attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// A name/value pair rendered as an embed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

/// A formatted message ready for delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    pub content: String,
    pub files: Vec<NotificationFile>,
    pub embed_fields: Vec<EmbedField>,
}

/// Delivers notifications to a webhook.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver one notification. Errors are not retried.
    async fn send(&self, webhook_url: &str, notification: &Notification) -> Result<(), DeliveryError>;
}
