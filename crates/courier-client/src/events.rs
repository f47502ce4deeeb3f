use courier_shared::protocol::TypingAction;
use courier_shared::ConversationKey;

/// Session-level notifications that are not store changes. Message, replace
/// and status changes come from the store's own
/// [`StoreEvent`](courier_store::StoreEvent) stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Typing {
        conversation_key: ConversationKey,
        sender: String,
        action: TypingAction,
    },
    /// A notification nobody classified, passed through as-is.
    Unclassified(serde_json::Value),
    /// The daemon reported a transport-level problem.
    DaemonError(String),
    /// The daemon went away without being asked to. The session is unusable
    /// until restarted.
    DaemonExited { code: Option<i32> },
}
