//! Discord-compatible webhook delivery.
//!
//! Posts `multipart/form-data` with a `payload_json` part and one
//! `files[n]` part per attachment.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use tracing::{debug, info};

use crate::channels::format::{MAX_MESSAGE_CONTENT_LENGTH, limit_embed_fields, truncate};
use crate::channels::{Notification, NotificationSender};
use crate::error::DeliveryError;

/// Split a webhook URL into its `(id, token)` path segments.
///
/// The URL must end in `/<id>/<token>`.
pub fn parse_webhook_url(url: &str) -> Result<(String, String), DeliveryError> {
    let invalid = || DeliveryError::InvalidWebhookUrl(url.to_string());

    reqwest::Url::parse(url).map_err(|_| invalid())?;

    let mut segments = url.rsplitn(3, '/');
    let token = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
    let id = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
    segments.next().ok_or_else(invalid)?;
    Ok((id.to_string(), token.to_string()))
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<Embed>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<AttachmentRef<'a>>,
}

#[derive(Debug, Serialize)]
struct Embed {
    fields: Vec<EmbedFieldPayload>,
}

#[derive(Debug, Serialize)]
struct EmbedFieldPayload {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct AttachmentRef<'a> {
    id: usize,
    filename: &'a str,
}

fn build_payload(notification: &Notification) -> WebhookPayload<'_> {
    let fields: Vec<EmbedFieldPayload> = limit_embed_fields(&notification.embed_fields)
        .into_iter()
        .map(|f| EmbedFieldPayload {
            name: f.name,
            value: f.value,
        })
        .collect();

    let embeds = if notification.embed_fields.is_empty() {
        Vec::new()
    } else {
        vec![Embed { fields }]
    };

    WebhookPayload {
        content: truncate(&notification.content, MAX_MESSAGE_CONTENT_LENGTH),
        embeds,
        attachments: notification
            .files
            .iter()
            .enumerate()
            .map(|(id, file)| AttachmentRef {
                id,
                filename: &file.name,
            })
            .collect(),
    }
}

/// Sends notifications to a Discord webhook.
pub struct DiscordWebhook {
    client: reqwest::Client,
    dry_run: bool,
}

impl DiscordWebhook {
    /// With `dry_run` set, payloads are logged instead of posted.
    pub fn new(dry_run: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

#[async_trait]
impl NotificationSender for DiscordWebhook {
    async fn send(&self, webhook_url: &str, notification: &Notification) -> Result<(), DeliveryError> {
        let (webhook_id, _) = parse_webhook_url(webhook_url)?;
        let payload = serde_json::to_string(&build_payload(notification))?;

        if self.dry_run {
            let files: Vec<String> = notification
                .files
                .iter()
                .map(|f| format!("{} ({} bytes)", f.name, f.data.len()))
                .collect();
            info!(
                webhook_id = %webhook_id,
                payload = %payload,
                files = ?files,
                "DRY_RUN=true (not sending the message)"
            );
            return Ok(());
        }

        let mut form = Form::new().text("payload_json", payload);
        for (index, file) in notification.files.iter().enumerate() {
            let part = Part::bytes(file.data.clone()).file_name(file.name.clone());
            form = form.part(format!("files[{index}]"), part);
        }

        let resp = self
            .client
            .post(webhook_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DeliveryError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(
            webhook_id = %webhook_id,
            files = notification.files.len(),
            "Notification delivered"
        );
        Ok(())
    }
}
