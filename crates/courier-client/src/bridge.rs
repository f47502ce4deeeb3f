//! Daemon event bridge.
//!
//! Consumes the [`DaemonEvent`] stream of the engine, resolves every event to
//! a conversation, and writes the outcome to the store. The store then
//! notifies its own subscribers. The bridge never calls back into the daemon,
//! so a slow daemon cannot block event processing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use courier_rpc::DaemonEvent;
use courier_shared::constants::SELF_SENDER;
use courier_shared::protocol::{IncomingMessage, Receipt, ReceiptKind, SyncedMessage, Typing};
use courier_store::{Database, MessageStatus, StoredMessage};

use crate::events::SessionEvent;
use crate::state::AppPhase;

/// Store row for a message received from someone else, or `None` when it
/// cannot be attributed to a conversation or carries nothing to show.
pub fn incoming_to_stored(message: &IncomingMessage) -> Option<StoredMessage> {
    let key = message.sender.conversation_key(message.group_id.as_deref());
    if key.is_empty() {
        debug!(timestamp = message.timestamp, "Dropping message without a conversation");
        return None;
    }
    let Some(content) = message.display_text() else {
        debug!(timestamp = message.timestamp, "Dropping message without content");
        return None;
    };

    Some(StoredMessage {
        id: StoredMessage::confirmed_id(message.timestamp),
        conversation_key: key,
        sender: message.sender.best_handle().unwrap_or_default().to_string(),
        sender_name: message.sender.name.clone(),
        content,
        timestamp: message.timestamp,
        outgoing: false,
        status: MessageStatus::default(),
    })
}

/// Store row for a message this account sent from another device.
pub fn synced_to_stored(message: &SyncedMessage) -> Option<StoredMessage> {
    let key = message
        .destination
        .conversation_key(message.group_id.as_deref());
    if key.is_empty() {
        debug!(timestamp = message.timestamp, "Dropping synced message without a conversation");
        return None;
    }
    let Some(content) = message.display_text() else {
        debug!(timestamp = message.timestamp, "Dropping synced message without content");
        return None;
    };

    Some(StoredMessage {
        id: StoredMessage::confirmed_id(message.timestamp),
        conversation_key: key,
        sender: SELF_SENDER.to_string(),
        sender_name: None,
        content,
        timestamp: message.timestamp,
        outgoing: true,
        status: MessageStatus::Sent,
    })
}

/// Status a receipt moves its messages to.
pub fn receipt_status(kind: ReceiptKind) -> MessageStatus {
    match kind {
        ReceiptKind::Read | ReceiptKind::Viewed => MessageStatus::Read,
        ReceiptKind::Delivery | ReceiptKind::Unknown => MessageStatus::Delivered,
    }
}

/// Everything the bridge task needs, shared with the owning session.
pub(crate) struct Bridge {
    pub(crate) db: Arc<Mutex<Database>>,
    pub(crate) phase: Arc<watch::Sender<AppPhase>>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) stopping: Arc<AtomicBool>,
}

impl Bridge {
    /// Consume `rx`, the engine's lossless feed, so every notification is
    /// persisted in the order the daemon wrote it.
    pub(crate) fn spawn(self, rx: mpsc::UnboundedReceiver<DaemonEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<DaemonEvent>) {
        info!("Daemon event bridge started");

        while let Some(event) = rx.recv().await {
            self.handle(event);
        }

        info!("Daemon event bridge stopped");
    }

    pub(crate) fn handle(&self, event: DaemonEvent) {
        match event {
            DaemonEvent::Message(message) => {
                if let Some(stored) = incoming_to_stored(&message) {
                    self.store(&stored);
                }
            }

            DaemonEvent::Sync(message) => {
                if let Some(stored) = synced_to_stored(&message) {
                    self.store(&stored);
                }
            }

            DaemonEvent::Receipt(receipt) => self.apply_receipt(&receipt),

            DaemonEvent::Typing(typing) => self.forward_typing(typing),

            DaemonEvent::Unclassified(value) => {
                let _ = self.events.send(SessionEvent::Unclassified(value));
            }

            DaemonEvent::Ready => debug!("Daemon ready"),

            DaemonEvent::Error(reason) => {
                warn!(%reason, "Daemon error");
                let _ = self.events.send(SessionEvent::DaemonError(reason));
            }

            DaemonEvent::Close(code) => {
                if self.stopping.load(Ordering::SeqCst) {
                    debug!(?code, "Daemon closed during shutdown");
                    return;
                }
                warn!(?code, "Daemon exited unexpectedly");
                self.phase.send_replace(AppPhase::link_error(match code {
                    Some(code) => format!("daemon exited with code {code}"),
                    None => "daemon exited".to_string(),
                }));
                let _ = self.events.send(SessionEvent::DaemonExited { code });
            }
        }
    }

    fn store(&self, message: &StoredMessage) {
        let Ok(db) = self.db.lock() else {
            warn!(id = %message.id, "Database lock poisoned, message not stored");
            return;
        };
        if let Err(e) = db.add_message(message) {
            warn!(id = %message.id, error = %e, "Failed to store message");
        }
    }

    fn apply_receipt(&self, receipt: &Receipt) {
        let status = receipt_status(receipt.kind);
        let Ok(db) = self.db.lock() else {
            warn!("Database lock poisoned, receipt dropped");
            return;
        };

        for &timestamp in &receipt.timestamps {
            match db.update_message_status(timestamp, status) {
                Ok(0) => debug!(timestamp, %status, "Receipt matched no outgoing message"),
                Ok(_) => {}
                Err(e) => warn!(timestamp, error = %e, "Failed to apply receipt"),
            }
        }
    }

    fn forward_typing(&self, typing: Typing) {
        let conversation_key = typing.sender.conversation_key(typing.group_id.as_deref());
        if conversation_key.is_empty() {
            debug!("Dropping typing indicator without a conversation");
            return;
        }
        let _ = self.events.send(SessionEvent::Typing {
            conversation_key,
            sender: typing.sender.best_handle().unwrap_or_default().to_string(),
            action: typing.action,
        });
    }
}
