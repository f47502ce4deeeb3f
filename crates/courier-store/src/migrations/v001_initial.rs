//! v001 -- Initial schema creation.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id               TEXT PRIMARY KEY NOT NULL,  -- decimal timestamp or local-...
    conversation_key TEXT NOT NULL,              -- group id or normalized handle
    sender           TEXT NOT NULL,              -- handle, or 'self'
    content          TEXT NOT NULL,
    timestamp        INTEGER NOT NULL,           -- ms since epoch
    outgoing         INTEGER NOT NULL DEFAULT 0  -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_key, timestamp);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
