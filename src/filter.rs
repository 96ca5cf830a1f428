//! Sender allow/deny filtering.
//!
//! List entries come in three forms:
//! - `user@example.com` matches that address exactly (case-insensitive)
//! - `example.com` matches the domain and all of its subdomains
//! - `@example.com` is the same as `example.com`
//!
//! When an address matches both lists, the longer (more specific) entry
//! wins. Deny wins a tie.

use tracing::info;

/// Outcome of filtering one sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    Reject(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The allow list is non-empty and nothing in it matched.
    NotAllowed,
    /// This deny entry matched at least as specifically as any allow entry.
    Denied { entry: String },
}

impl FilterDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Decide whether mail from `sender` should be relayed.
pub fn evaluate(sender: &str, allow: &[String], deny: &[String]) -> FilterDecision {
    let allow_match = most_specific_match(sender, allow);
    if !allow.is_empty() && allow_match.is_none() {
        return FilterDecision::Reject(RejectReason::NotAllowed);
    }

    let allow_len = allow_match.map_or(0, str::len);
    match most_specific_match(sender, deny) {
        Some(entry) if entry.len() >= allow_len => FilterDecision::Reject(RejectReason::Denied {
            entry: entry.to_string(),
        }),
        _ => FilterDecision::Accept,
    }
}

/// [`evaluate`], logging the reason for a rejection.
pub fn satisfies_filter(sender: &str, allow: &[String], deny: &[String], uid: u32) -> bool {
    let decision = evaluate(sender, allow, deny);
    match &decision {
        FilterDecision::Accept => {}
        FilterDecision::Reject(RejectReason::NotAllowed) => {
            info!(uid, sender, "Skipping message: sender not in the allow list");
        }
        FilterDecision::Reject(RejectReason::Denied { entry }) => {
            if entry.eq_ignore_ascii_case(sender) {
                info!(uid, sender, "Skipping message: sender is in the deny list");
            } else {
                info!(uid, sender, entry = %entry, "Skipping message: sender matches the deny list");
            }
        }
    }
    decision.is_accepted()
}

/// The longest entry in `list` that matches `sender`.
fn most_specific_match<'a>(sender: &str, list: &'a [String]) -> Option<&'a str> {
    list.iter()
        .map(String::as_str)
        .filter(|entry| matches_entry(sender, entry))
        .max_by_key(|entry| entry.len())
}

fn matches_entry(sender: &str, entry: &str) -> bool {
    if let Some(domain) = entry.strip_prefix('@') {
        return matches_domain(sender, domain);
    }
    if entry.contains('@') {
        return sender.eq_ignore_ascii_case(entry);
    }
    matches_domain(sender, entry)
}

fn matches_domain(sender: &str, domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    let Some((_, sender_domain)) = sender.rsplit_once('@') else {
        return false;
    };
    let sender_domain = sender_domain.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    sender_domain == domain || sender_domain.ends_with(&format!(".{domain}"))
}
