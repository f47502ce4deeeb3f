use courier_shared::protocol::{Envelope, IncomingMessage, Receipt, SyncedMessage, Typing};

/// Events published by [`RpcClient`](crate::RpcClient).
///
/// At most one of `Message`, `Sync`, `Receipt`, `Typing` or `Unclassified`
/// is published per notification line.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// A message from another account.
    Message(IncomingMessage),
    /// A message this account sent from another device.
    Sync(SyncedMessage),
    Receipt(Receipt),
    Typing(Typing),
    /// A notification that matched no known shape, passed through as-is.
    Unclassified(serde_json::Value),
    /// The daemon process is up and accepting requests.
    Ready,
    /// A transport-level failure outside any single call.
    Error(String),
    /// The daemon is gone. Carries the exit code when one is known.
    Close(Option<i32>),
}

impl From<Envelope> for DaemonEvent {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Message(m) => DaemonEvent::Message(m),
            Envelope::Sync(s) => DaemonEvent::Sync(s),
            Envelope::Receipt(r) => DaemonEvent::Receipt(r),
            Envelope::Typing(t) => DaemonEvent::Typing(t),
            Envelope::Other(v) => DaemonEvent::Unclassified(v),
        }
    }
}
