//! v003 -- Receipts that arrived before the message they acknowledge.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pending_receipts (
    timestamp INTEGER PRIMARY KEY NOT NULL,  -- id of the acknowledged message
    status    TEXT NOT NULL                  -- 'delivered' or 'read'
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
