//! v002 -- Sender display name and delivery status.

use rusqlite::Connection;

use super::add_column_if_missing;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    add_column_if_missing(conn, "messages", "sender_name TEXT")?;
    add_column_if_missing(conn, "messages", "status TEXT NOT NULL DEFAULT 'sent'")?;
    Ok(())
}
