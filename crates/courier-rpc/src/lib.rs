//! JSON-RPC engine for the messaging daemon.
//!
//! The daemon runs as a child process speaking newline-delimited JSON-RPC on
//! its stdio. [`RpcClient`] owns that process, correlates responses with the
//! calls that caused them, and fans unsolicited notifications out as typed
//! [`DaemonEvent`]s.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod framing;

pub use client::RpcClient;
pub use config::DaemonConfig;
pub use error::RpcError;
pub use events::DaemonEvent;
pub use framing::LineBuffer;
