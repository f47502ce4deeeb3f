//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. It also owns the broadcast
//! channel that [`StoreEvent`]s are published on.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::error::{Result, StoreError};
use crate::events::StoreEvent;
use crate::migrations;

/// File name of the message cache inside the data directory.
pub const DB_FILE_NAME: &str = "courier.db";

const EVENT_CAPACITY: usize = 256;

/// Wrapper around a [`rusqlite::Connection`].
///
/// Once [`close`](Self::close) has been called every operation fails with
/// [`StoreError::Closed`].
pub struct Database {
    conn: Option<Connection>,
    events: broadcast::Sender<StoreEvent>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/courier/courier.db`
    /// - macOS:   `~/Library/Application Support/com.courier.courier/courier.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\courier\courier\data\courier.db`
    pub fn open_default() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "courier", "courier").ok_or(StoreError::NoDataDir)?;

        let db_path = project_dirs.data_dir().join(DB_FILE_NAME);

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path, creating missing
    /// parent directories.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::with_connection(conn)
    }

    /// Open a private in-memory database. Nothing survives the handle.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let db = Self {
            conn: Some(conn),
            events,
        };
        db.init()?;
        Ok(db)
    }

    /// Bring the schema up to date. Safe to call any number of times.
    pub fn init(&self) -> Result<()> {
        migrations::run_migrations(self.conn()?)
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed helpers, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(StoreError::Closed)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .as_ref()
            .and_then(|c| c.path())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Close the connection. Later calls fail with [`StoreError::Closed`];
    /// closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            tracing::debug!("database closed");
        }
        Ok(())
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
        assert!(path.exists());
    }

    #[test]
    fn open_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("courier.db");

        Database::open_at(&path).expect("should open");
        assert!(path.exists());
    }

    #[test]
    fn init_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db.init().unwrap();

        let version: u32 = db
            .conn()
            .unwrap()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 3);
    }

    #[test]
    fn legacy_schema_gains_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");

        // A database written before versioning: v001 columns plus a status
        // column, user_version still 0.
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE messages (
                    id TEXT PRIMARY KEY NOT NULL,
                    conversation_key TEXT NOT NULL,
                    sender TEXT NOT NULL,
                    content TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    outgoing INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'sent'
                );
                INSERT INTO messages (id, conversation_key, sender, content, timestamp)
                VALUES ('1', '+15550001111', '+15550001111', 'old', 1);",
            )
            .unwrap();
        }

        let db = Database::open_at(&path).expect("migration should tolerate existing column");
        let count: i64 = db
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM messages WHERE sender_name IS NULL", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn closed_database_rejects_operations() {
        let mut db = Database::open_in_memory().unwrap();
        db.close().unwrap();
        db.close().unwrap();

        assert!(db.is_closed());
        assert!(matches!(db.init(), Err(StoreError::Closed)));
        assert!(matches!(db.conn(), Err(StoreError::Closed)));
    }
}
