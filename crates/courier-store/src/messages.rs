use std::collections::HashMap;

use courier_shared::constants::OPTIMISTIC_ID_PREFIX;
use courier_shared::ConversationKey;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::events::StoreEvent;
use crate::models::{ConversationMeta, MessageStatus, StoredMessage};

const SELECT_COLUMNS: &str =
    "id, conversation_key, sender, sender_name, content, timestamp, outgoing, status";

/// Insert-or-overwrite keyed on `id`. The row keeps its rowid (and so its
/// place among equal timestamps) and its status never regresses.
const UPSERT_SQL: &str = "
    INSERT INTO messages
        (id, conversation_key, sender, sender_name, content, timestamp, outgoing, status)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
    ON CONFLICT(id) DO UPDATE SET
        conversation_key = excluded.conversation_key,
        sender           = excluded.sender,
        sender_name      = excluded.sender_name,
        content          = excluded.content,
        timestamp        = excluded.timestamp,
        outgoing         = excluded.outgoing,
        status = CASE
            WHEN (CASE messages.status WHEN 'read' THEN 3 WHEN 'delivered' THEN 2 WHEN 'sent' THEN 1 ELSE 0 END)
               > (CASE excluded.status WHEN 'read' THEN 3 WHEN 'delivered' THEN 2 WHEN 'sent' THEN 1 ELSE 0 END)
            THEN messages.status
            ELSE excluded.status
        END";

/// Remember the strongest receipt seen for a timestamp no stored message
/// carries yet.
const PENDING_RECEIPT_SQL: &str = "
    INSERT INTO pending_receipts (timestamp, status) VALUES (?1, ?2)
    ON CONFLICT(timestamp) DO UPDATE SET
        status = CASE
            WHEN (CASE pending_receipts.status WHEN 'read' THEN 3 WHEN 'delivered' THEN 2 ELSE 0 END)
               > (CASE excluded.status WHEN 'read' THEN 3 WHEN 'delivered' THEN 2 ELSE 0 END)
            THEN pending_receipts.status
            ELSE excluded.status
        END";

/// Pending receipts kept at most; the oldest timestamps go first.
const PENDING_RECEIPT_LIMIT: u32 = 1024;

impl Database {
    /// Insert a message, or overwrite the row that already has its id.
    ///
    /// An outgoing message picks up any receipt that arrived for its
    /// timestamp before it was stored.
    pub fn add_message(&self, message: &StoredMessage) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let stored = upsert(&tx, message)?;
        tx.commit()?;

        tracing::trace!(id = %message.id, key = %message.conversation_key, "message stored");
        self.emit(StoreEvent::NewMessage {
            message: stored,
            conversation_key: message.conversation_key.clone(),
        });
        Ok(())
    }

    /// Return up to `limit` messages of a conversation in ascending
    /// timestamp order: the newest ones, or the newest ones strictly older
    /// than `before` when given.
    pub fn get_messages(
        &self,
        key: &ConversationKey,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn()?.prepare(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM messages
             WHERE conversation_key = ?1 AND (?2 IS NULL OR timestamp < ?2)
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(params![key.as_str(), before, limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    pub fn get_message(&self, id: &str) -> Result<Option<StoredMessage>> {
        let message = self
            .conn()?
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Apply a delivery status to every confirmed outgoing message sent at
    /// `timestamp`, skipping rows where it would move the status backwards. Returns the
    /// number of rows changed.
    ///
    /// A delivered or read receipt for a timestamp no outgoing message has
    /// yet is kept and applied once that message is added or replaced.
    pub fn update_message_status(&self, timestamp: i64, status: MessageStatus) -> Result<usize> {
        let from: Vec<&'static str> = MessageStatus::ALL
            .into_iter()
            .filter(|s| s.can_advance_to(status))
            .map(MessageStatus::as_str)
            .collect();
        if from.is_empty() {
            return Ok(0);
        }

        let placeholders = (0..from.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE messages SET status = ?1
             WHERE timestamp = ?2 AND outgoing = 1 AND id NOT LIKE ?3 || '%'
               AND status IN ({placeholders})"
        );

        let status_str = status.as_str();
        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(from.len() + 3);
        values.push(&status_str);
        values.push(&timestamp);
        values.push(&OPTIMISTIC_ID_PREFIX);
        values.extend(from.iter().map(|s| s as &dyn ToSql));

        let conn = self.conn()?;
        let changed = conn.execute(&sql, values.as_slice())?;

        if changed > 0 {
            tracing::debug!(timestamp, %status, changed, "message status updated");
            self.emit(StoreEvent::StatusUpdated { timestamp, status });
        } else if matches!(status, MessageStatus::Delivered | MessageStatus::Read) {
            let known: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM messages
                 WHERE timestamp = ?1 AND outgoing = 1 AND id NOT LIKE ?2 || '%')",
                params![timestamp, OPTIMISTIC_ID_PREFIX],
                |row| row.get(0),
            )?;
            if !known {
                conn.execute(PENDING_RECEIPT_SQL, params![timestamp, status_str])?;
                conn.execute(
                    "DELETE FROM pending_receipts WHERE timestamp NOT IN
                        (SELECT timestamp FROM pending_receipts ORDER BY timestamp DESC LIMIT ?1)",
                    params![PENDING_RECEIPT_LIMIT],
                )?;
                tracing::debug!(timestamp, %status, "receipt held until its message is stored");
            }
        }
        Ok(changed)
    }

    /// Apply a delivery status to one outgoing message by id, with the same
    /// forward-only rule as [`update_message_status`](Self::update_message_status).
    pub fn set_message_status(&self, id: &str, status: MessageStatus) -> Result<bool> {
        let Some(current) = self.get_message(id)? else {
            return Ok(false);
        };
        if !current.outgoing || !current.status.can_advance_to(status) {
            return Ok(false);
        }

        self.conn()?.execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;

        tracing::debug!(id, %status, "message status set");
        self.emit(StoreEvent::StatusUpdated {
            timestamp: current.timestamp,
            status,
        });
        Ok(true)
    }

    /// Atomically swap the row `old_id` for `message`. If a row with the new
    /// id already exists (a synced echo won the race) it is overwritten, so
    /// exactly one row survives either way.
    pub fn replace_message(&self, old_id: &str, message: &StoredMessage) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM messages WHERE id = ?1", params![old_id])?;
        let stored = upsert(&tx, message)?;
        tx.commit()?;

        tracing::debug!(old_id, new_id = %message.id, "optimistic message replaced");
        self.emit(StoreEvent::MessageReplaced {
            old_id: old_id.to_string(),
            message: stored,
        });
        Ok(())
    }

    pub fn get_conversation_last_message(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<StoredMessage>> {
        let message = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM messages
                     WHERE conversation_key = ?1
                     ORDER BY timestamp DESC, rowid DESC
                     LIMIT 1"
                ),
                params![key.as_str()],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Newest message per conversation, keyed by conversation.
    pub fn get_all_conversation_metadata(
        &self,
    ) -> Result<HashMap<ConversationKey, ConversationMeta>> {
        let mut stmt = self.conn()?.prepare(
            "SELECT m.conversation_key, m.timestamp, m.content
             FROM messages m
             WHERE m.rowid = (
                 SELECT i.rowid FROM messages i
                 WHERE i.conversation_key = m.conversation_key
                 ORDER BY i.timestamp DESC, i.rowid DESC
                 LIMIT 1
             )",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                ConversationKey::new(row.get::<_, String>(0)?),
                ConversationMeta {
                    timestamp: row.get(1)?,
                    content: row.get(2)?,
                },
            ))
        })?;

        let mut metadata = HashMap::new();
        for row in rows {
            let (key, meta) = row?;
            metadata.insert(key, meta);
        }
        Ok(metadata)
    }

    /// Delete every message and every held receipt.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM messages", [])?;
        conn.execute("DELETE FROM pending_receipts", [])?;
        tracing::info!(deleted, "message cache cleared");
        self.emit(StoreEvent::Cleared);
        Ok(())
    }
}

/// Write `message` and fold in a held receipt for its timestamp. Returns the
/// message as stored, with the status it ended up with.
fn upsert(conn: &Connection, message: &StoredMessage) -> rusqlite::Result<StoredMessage> {
    conn.execute(
        UPSERT_SQL,
        params![
            message.id,
            message.conversation_key.as_str(),
            message.sender,
            message.sender_name,
            message.content,
            message.timestamp,
            message.outgoing,
            message.status.as_str(),
        ],
    )?;

    let mut stored = message.clone();
    if !message.outgoing {
        return Ok(stored);
    }

    let pending: Option<String> = conn
        .query_row(
            "SELECT status FROM pending_receipts WHERE timestamp = ?1",
            params![message.timestamp],
            |row| row.get(0),
        )
        .optional()?;
    let Some(pending) = pending else {
        return Ok(stored);
    };
    conn.execute(
        "DELETE FROM pending_receipts WHERE timestamp = ?1",
        params![message.timestamp],
    )?;

    let receipt = parse_status(&pending, 1)?;
    let current: String = conn.query_row(
        "SELECT status FROM messages WHERE id = ?1",
        params![message.id],
        |row| row.get(0),
    )?;
    stored.status = parse_status(&current, 7)?;
    if stored.status.can_advance_to(receipt) {
        conn.execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            params![receipt.as_str(), message.id],
        )?;
        tracing::debug!(id = %message.id, status = %receipt, "held receipt applied");
        stored.status = receipt;
    }
    Ok(stored)
}

fn parse_status(value: &str, column: usize) -> rusqlite::Result<MessageStatus> {
    value
        .parse::<MessageStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let status = parse_status(&row.get::<_, String>(7)?, 7)?;

    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_key: ConversationKey::new(row.get::<_, String>(1)?),
        sender: row.get(2)?,
        sender_name: row.get(3)?,
        content: row.get(4)?,
        timestamp: row.get(5)?,
        outgoing: row.get(6)?,
        status,
    })
}
