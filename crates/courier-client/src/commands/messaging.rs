use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use courier_shared::constants::{methods, OPTIMISTIC_ID_PREFIX, SELF_SENDER};
use courier_shared::types::Recipient;
use courier_shared::ConversationKey;
use courier_store::{MessageStatus, StoredMessage};

use crate::error::ClientError;
use crate::session::Session;

/// Default page size for [`Session::messages`].
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// What became of a [`Session::send_message`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SendOutcome {
    /// The daemon accepted the message; `id` is its confirmed id.
    Sent { id: String },
    /// The daemon rejected the message or never answered. The optimistic
    /// row stays in the cache marked failed under `id`.
    Failed { id: String, reason: String },
}

impl SendOutcome {
    /// Id of the stored message either way.
    pub fn id(&self) -> &str {
        match self {
            SendOutcome::Sent { id } | SendOutcome::Failed { id, .. } => id,
        }
    }
}

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub key: ConversationKey,
    pub timestamp: i64,
    pub last_message: String,
}

#[derive(Debug, Deserialize)]
struct SendResult {
    timestamp: i64,
}

/// Temporary id for a message the daemon has not confirmed yet.
pub fn optimistic_id(sent_at_ms: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{OPTIMISTIC_ID_PREFIX}{sent_at_ms}-{}", &suffix[..8])
}

impl Session {
    /// Send `text` to `recipient`.
    ///
    /// The message is cached immediately under a temporary id so it shows up
    /// at once. When the daemon confirms, the row is replaced by one keyed on
    /// the daemon's timestamp; when it fails, the row is marked failed.
    pub async fn send_message(
        &self,
        recipient: &Recipient,
        text: &str,
    ) -> Result<SendOutcome, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let sent_at = Utc::now().timestamp_millis();
        let optimistic = StoredMessage {
            id: optimistic_id(sent_at),
            conversation_key: recipient.conversation_key(),
            sender: SELF_SENDER.to_string(),
            sender_name: None,
            content: text.to_string(),
            timestamp: sent_at,
            outgoing: true,
            status: MessageStatus::Sent,
        };
        self.lock_db()?.add_message(&optimistic)?;

        let params = match recipient {
            Recipient::Direct(handle) => json!({ "message": text, "recipient": [handle] }),
            Recipient::Group(group_id) => json!({ "message": text, "groupId": group_id }),
        };

        match self
            .rpc
            .call_as::<SendResult>(methods::SEND, Some(params))
            .await
        {
            Ok(SendResult { timestamp }) => {
                let confirmed = StoredMessage {
                    id: StoredMessage::confirmed_id(timestamp),
                    timestamp,
                    ..optimistic.clone()
                };
                self.lock_db()?
                    .replace_message(&optimistic.id, &confirmed)?;

                info!(
                    id = %confirmed.id,
                    key = %confirmed.conversation_key,
                    "Message sent"
                );
                Ok(SendOutcome::Sent { id: confirmed.id })
            }
            Err(e) => {
                if !self.is_stopping() {
                    warn!(id = %optimistic.id, error = %e, "Send failed");
                }

                let marked = self
                    .lock_db()
                    .and_then(|db| Ok(db.set_message_status(&optimistic.id, MessageStatus::Failed)?));
                if let Err(store_err) = marked {
                    if !self.is_stopping() {
                        return Err(store_err);
                    }
                }

                Ok(SendOutcome::Failed {
                    id: optimistic.id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Up to `limit` messages of a conversation, oldest first, optionally
    /// only those older than `before`.
    pub fn messages(
        &self,
        key: &ConversationKey,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<StoredMessage>, ClientError> {
        Ok(self.lock_db()?.get_messages(key, limit, before)?)
    }

    /// Every conversation with its newest message, most recent first.
    pub fn conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        let metadata = self.lock_db()?.get_all_conversation_metadata()?;

        let mut summaries: Vec<ConversationSummary> = metadata
            .into_iter()
            .map(|(key, meta)| ConversationSummary {
                key,
                timestamp: meta.timestamp,
                last_message: meta.content,
            })
            .collect();
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.key.cmp(&b.key)));
        Ok(summaries)
    }
}
