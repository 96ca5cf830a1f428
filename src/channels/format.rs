//! Message → notification formatting.
//!
//! Lengths are counted in characters, not bytes.

use std::collections::BTreeMap;

use regex::Regex;

use crate::channels::{EmbedField, Notification, NotificationFile};
use crate::mailbox::ParsedEmail;

/// Longest message content the webhook accepts.
pub const MAX_MESSAGE_CONTENT_LENGTH: usize = 2000;

pub const MAX_EMBED_FIELD_NAME_LENGTH: usize = 256;

pub const MAX_EMBED_FIELD_VALUE_LENGTH: usize = 1024;

/// Combined size of all embed field names and values.
pub const MAX_ALL_EMBED_STRUCTURES_SIZE: usize = 6000;

/// Longest From / Subject value shown in the title.
const MAX_TITLE_VALUE_LENGTH: usize = 200;

const ELLIPSIS: &str = " ...";

const EMPTY_BODY: &str = "*(end of message)*";

/// Name of the file carrying a body too long to inline.
pub const BODY_FILE_NAME: &str = "message.txt";

/// Trim surrounding whitespace and collapse runs of blank lines to one.
pub fn trim(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    let mut out = String::with_capacity(normalized.len());
    let mut newlines = 0usize;
    for ch in normalized.trim().chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(ch);
            }
        } else {
            newlines = 0;
            out.push(ch);
        }
    }
    out
}

/// Cut `content` to at most `max_len` characters, marking the cut with `" ..."`.
pub fn truncate(content: &str, max_len: usize) -> String {
    if content.chars().count() <= max_len {
        return content.to_string();
    }
    let keep = max_len.saturating_sub(ELLIPSIS.len());
    let mut out: String = content.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Backslash-escape the characters the chat renders as markdown.
pub fn escape_markdown(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for ch in content.chars() {
        if matches!(ch, '_' | '*' | '~' | '`' | '>' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Build the notification for one message.
///
/// Content is a bold From / Subject title, a blank line, then the escaped
/// body. When that exceeds the content limit only the title is sent and
/// the unescaped body travels as `message.txt`, ahead of the message's own
/// attachments. Glossary terms found as whole words in the title or body
/// become embed fields.
pub fn build_notification(email: &ParsedEmail, glossary: &BTreeMap<String, String>) -> Notification {
    let title = [
        ("From", trim(email.from_text.as_deref().unwrap_or(""))),
        ("Subject", trim(email.subject.as_deref().unwrap_or(""))),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(label, value)| {
        format!(
            "**{label}**: {}",
            escape_markdown(&truncate(&value, MAX_TITLE_VALUE_LENGTH))
        )
    })
    .collect::<Vec<_>>()
    .join("\n");

    let raw_body = trim(&email.body());
    let escaped_body = if raw_body.is_empty() {
        EMPTY_BODY.to_string()
    } else {
        escape_markdown(&raw_body)
    };

    let mut files: Vec<NotificationFile> = email
        .attachments
        .iter()
        .enumerate()
        .map(|(index, attachment)| NotificationFile {
            name: attachment
                .filename
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| format!("attachment {}", index + 1)),
            data: attachment.content.clone(),
        })
        .collect();

    let mut content = format!("{title}\n\n{escaped_body}\n");
    if content.chars().count() > MAX_MESSAGE_CONTENT_LENGTH {
        content = title.clone();
        files.insert(
            0,
            NotificationFile {
                name: BODY_FILE_NAME.to_string(),
                data: raw_body.clone().into_bytes(),
            },
        );
    }

    let searchable = format!("{title}\n{raw_body}");
    let embed_fields = glossary
        .iter()
        .filter(|(term, _)| contains_word(&searchable, term))
        .map(|(term, definition)| EmbedField {
            name: term.clone(),
            value: definition.clone(),
        })
        .collect();

    Notification {
        content,
        files,
        embed_fields,
    }
}

/// Whether `term` occurs in `haystack` delimited by word boundaries.
fn contains_word(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    Regex::new(&format!(r"\b{}\b", regex::escape(term)))
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

/// Cap embed fields to the per-field and combined size limits.
///
/// Fields are kept in order until adding the next one would exceed the
/// combined limit.
pub fn limit_embed_fields(fields: &[EmbedField]) -> Vec<EmbedField> {
    let mut kept = Vec::with_capacity(fields.len());
    let mut size = 0usize;
    for field in fields {
        let name = truncate(&field.name, MAX_EMBED_FIELD_NAME_LENGTH);
        let value = truncate(&field.value, MAX_EMBED_FIELD_VALUE_LENGTH);
        size += name.chars().count() + value.chars().count();
        if size > MAX_ALL_EMBED_STRUCTURES_SIZE {
            break;
        }
        kept.push(EmbedField { name, value });
    }
    kept
}
