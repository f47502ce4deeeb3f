//! # courier-shared
//!
//! Types shared by every Courier crate: the JSON-RPC wire protocol spoken by
//! the messaging daemon, the classified [`protocol::Envelope`] union, and the
//! conversation identity resolver that maps daemon handles onto one
//! [`types::ConversationKey`].

pub mod constants;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use identity::{is_phone_like, normalize_handle};
pub use protocol::{classify_line, Envelope, Inbound};
pub use types::ConversationKey;
