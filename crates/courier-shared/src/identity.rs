//! Conversation identity resolution.
//!
//! The daemon reports the same counterparty in several shapes: a formatted
//! phone number, a bare E.164 number, an account UUID, or a group id. Every
//! message, synced echo, and optimistic local write for one thread has to land
//! on the same [`ConversationKey`], so all of them go through this module.
//!
//! Everything here is pure: no I/O, no state, no panics.

use crate::types::ConversationKey;

/// Strip every character that is not a digit, keeping a single leading `+`
/// when the trimmed input started with one.
///
/// `None` normalizes to the empty string.
pub fn normalize_handle(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    let trimmed = raw.trim();

    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    out
}

/// Whether a handle looks like a phone number rather than an opaque id.
///
/// Requires at least one digit and nothing but digits and the punctuation
/// people use when writing numbers. A UUID fails because of its hex letters.
pub fn is_phone_like(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.chars().any(|c| c.is_ascii_digit())
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')' | '.'))
}

impl ConversationKey {
    /// Resolve the conversation an event belongs to.
    ///
    /// Order of preference:
    /// 1. the group id, verbatim;
    /// 2. the first phone-like entry of `handles`, normalized;
    /// 3. `unique_id`, verbatim;
    /// 4. the first non-empty entry of `handles`, verbatim (an opaque id
    ///    reported in a generic `source` field);
    /// 5. the empty key, which callers treat as "drop this event".
    pub fn resolve(
        group_id: Option<&str>,
        handles: &[Option<&str>],
        unique_id: Option<&str>,
    ) -> Self {
        if let Some(group) = non_empty(group_id) {
            return Self(group.to_string());
        }

        if let Some(number) = handles
            .iter()
            .filter_map(|h| non_empty(*h))
            .find(|h| is_phone_like(h))
        {
            return Self(normalize_handle(Some(number)));
        }

        if let Some(uuid) = non_empty(unique_id) {
            return Self(uuid.to_string());
        }

        handles
            .iter()
            .find_map(|h| non_empty(*h))
            .map(|h| Self(h.to_string()))
            .unwrap_or_default()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
