use courier_shared::ConversationKey;

use crate::models::{MessageStatus, StoredMessage};

/// Change notifications published by [`Database`](crate::Database).
///
/// Each event is sent after the write it describes has committed, from the
/// same call, so a listener that re-reads on receipt always sees the change.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    NewMessage {
        message: StoredMessage,
        conversation_key: ConversationKey,
    },
    MessageReplaced {
        old_id: String,
        message: StoredMessage,
    },
    StatusUpdated {
        timestamp: i64,
        status: MessageStatus,
    },
    /// Every message was deleted.
    Cleared,
}
