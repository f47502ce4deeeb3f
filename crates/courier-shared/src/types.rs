use serde::{Deserialize, Serialize};

/// Canonical identifier of a conversation thread.
///
/// Either a group id verbatim, a normalized phone number (`+` and digits), or
/// an opaque account UUID when the counterparty hides their number. Built by
/// [`ConversationKey::resolve`](crate::identity).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConversationKey(pub String);

impl ConversationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty key means the event could not be attributed to any thread.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConversationKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where an outgoing message is addressed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Recipient {
    /// A single account, by phone number or UUID.
    Direct(String),
    /// A group, by its base64 group id.
    Group(String),
}

impl Recipient {
    pub fn conversation_key(&self) -> ConversationKey {
        match self {
            Recipient::Direct(handle) => ConversationKey::resolve(None, &[Some(handle)], None),
            Recipient::Group(id) => ConversationKey::resolve(Some(id), &[], None),
        }
    }
}
