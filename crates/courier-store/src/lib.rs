//! # courier-store
//!
//! Local message cache for Courier, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection`, runs schema migrations on open, and publishes a
//! [`StoreEvent`] after every committed change so views can re-read.

pub mod database;
pub mod events;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use events::StoreEvent;
pub use models::*;
