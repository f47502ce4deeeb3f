//! # courier-client
//!
//! Orchestration layer of Courier: a [`Session`] ties the daemon engine
//! (`courier-rpc`) to the message cache (`courier-store`), drives the
//! loading → onboarding → chat lifecycle, and sends messages optimistically.

pub mod bridge;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod state;

pub use commands::directory::{Account, Contact, DaemonVersion, Group};
pub use commands::messaging::{ConversationSummary, SendOutcome};
pub use config::ClientConfig;
pub use error::ClientError;
pub use events::SessionEvent;
pub use session::Session;
pub use state::{AppPhase, LinkState};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber, writing to stderr. `RUST_LOG`
/// overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("courier=info,courier_client=info,courier_rpc=info,courier_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
