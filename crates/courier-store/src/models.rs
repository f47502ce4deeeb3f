//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a front-end.

use std::fmt;
use std::str::FromStr;

use courier_shared::ConversationKey;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Delivery state of an outgoing message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 4] = [
        MessageStatus::Sent,
        MessageStatus::Delivered,
        MessageStatus::Read,
        MessageStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    /// Status only moves forward: sent < delivered < read. A send can fail
    /// only before anything was acknowledged, and a receipt for a message
    /// marked failed proves it got through after all.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Sent, Delivered | Read | Failed) | (Delivered, Read) | (Failed, Delivered | Read)
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StoreError::InvalidStatus(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    /// Decimal timestamp for daemon-confirmed messages, `local-...` for
    /// optimistic sends awaiting confirmation.
    pub id: String,
    /// Thread this message belongs to.
    pub conversation_key: ConversationKey,
    /// Sender handle, or `"self"` for messages this account sent.
    pub sender: String,
    pub sender_name: Option<String>,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub outgoing: bool,
    pub status: MessageStatus,
}

impl StoredMessage {
    /// Id used for messages the daemon has assigned a timestamp to.
    pub fn confirmed_id(timestamp: i64) -> String {
        timestamp.to_string()
    }
}

// ---------------------------------------------------------------------------
// Conversation summary
// ---------------------------------------------------------------------------

/// Recency summary of one conversation, derived from its newest message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationMeta {
    pub timestamp: i64,
    pub content: String,
}
