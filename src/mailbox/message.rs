//! Parsed view of a fetched message.

use mail_parser::{MessageParser, MimeHeaders};
use tracing::warn;

/// A file carried by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: Option<String>,
    pub content: Vec<u8>,
}

/// The fields of a message the relay uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEmail {
    /// Display form of the From header, e.g. `Jane Doe <jane@example.com>`.
    pub from_text: Option<String>,
    /// Bare address of the first sender, used for filtering.
    pub sender_address: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl ParsedEmail {
    /// Parse raw RFC 5322 bytes.
    ///
    /// Input the parser cannot read, such as an empty message, yields an
    /// empty `ParsedEmail` with no sender, which is then filtered and
    /// relayed like any other.
    pub fn parse(uid: u32, raw: &[u8]) -> Self {
        let Some(parsed) = MessageParser::default().parse(raw) else {
            warn!(uid, len = raw.len(), "Message has no readable content");
            return Self::default();
        };

        let from_text = display_addresses(parsed.from());

        let sender_address = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string());

        let attachments = parsed
            .attachments()
            .map(|part| Attachment {
                filename: MimeHeaders::attachment_name(part).map(str::to_string),
                content: part.contents().to_vec(),
            })
            .collect();

        Self {
            from_text,
            sender_address,
            subject: parsed.subject().map(str::to_string),
            text: parsed.body_text(0).map(|t| t.into_owned()),
            html: parsed.body_html(0).map(|h| h.into_owned()),
            attachments,
        }
    }

    /// Sender address for filtering; empty when the message has none.
    pub fn sender(&self) -> &str {
        self.sender_address.as_deref().unwrap_or("")
    }

    /// Plain-text body, falling back to the HTML body with tags removed.
    pub fn body(&self) -> String {
        match (&self.text, &self.html) {
            (Some(text), _) if !text.trim().is_empty() => text.clone(),
            (_, Some(html)) => strip_html(html),
            _ => String::new(),
        }
    }
}

/// Render a From header the way mail clients show it.
fn display_addresses(addr: Option<&mail_parser::Address>) -> Option<String> {
    let addrs: Vec<&mail_parser::Addr> = match addr? {
        mail_parser::Address::List(addrs) => addrs.iter().collect(),
        mail_parser::Address::Group(groups) => {
            groups.iter().flat_map(|g| g.addresses.iter()).collect()
        }
    };
    let rendered: Vec<String> = addrs
        .into_iter()
        .filter_map(|a| match (a.name.as_deref(), a.address.as_deref()) {
            (Some(name), Some(email)) => Some(format!("{name} <{email}>")),
            (Some(name), None) => Some(name.to_string()),
            (None, Some(email)) => Some(email.to_string()),
            (None, None) => None,
        })
        .collect();
    (!rendered.is_empty()).then(|| rendered.join(", "))
}

/// Strip HTML tags, keeping line structure.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}
