//! Database migration runner.
//!
//! Migrations are executed in order on every [`Database::init`](crate::Database::init)
//! call. Each migration is guarded by the `user_version` pragma so it runs
//! exactly once.

pub mod v001_initial;
pub mod v002_sender_status;
pub mod v003_pending_receipts;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version. Bump this and add a new migration module whenever
/// the schema changes.
const CURRENT_VERSION: u32 = 3;

/// Run all pending migrations against the open connection.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::debug!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    if current < 1 {
        tracing::info!("applying migration v001_initial");
        v001_initial::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    if current < 2 {
        tracing::info!("applying migration v002_sender_status");
        v002_sender_status::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 2)?;
    }

    if current < 3 {
        tracing::info!("applying migration v003_pending_receipts");
        v003_pending_receipts::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 3)?;
    }

    Ok(())
}

/// `ALTER TABLE ... ADD COLUMN` that succeeds when the column already exists.
///
/// Databases written by older builds did not track `user_version`, so a
/// column may be present even though its migration has not been recorded.
pub(crate) fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column_def: &str,
) -> std::result::Result<(), rusqlite::Error> {
    match conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column_def}")) {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("duplicate column name") => {
            tracing::debug!(table, column = column_def, "column already present");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
