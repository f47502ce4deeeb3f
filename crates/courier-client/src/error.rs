use courier_rpc::RpcError;
use courier_store::StoreError;
use thiserror::Error;

/// Errors surfaced by [`Session`](crate::Session) operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A thread panicked while holding the database lock.
    #[error("Database lock poisoned")]
    Lock,

    #[error("Configuration error: {0}")]
    Config(String),

    /// `finishLink` returned but the daemon still reports no account.
    #[error("Device link finished but no account is registered")]
    LinkIncomplete,

    #[error("Refusing to send an empty message")]
    EmptyMessage,
}

impl ClientError {
    /// True when the failure only happened because the session is stopping.
    pub fn is_shutdown(&self) -> bool {
        match self {
            ClientError::Rpc(e) => e.is_shutdown(),
            ClientError::Store(StoreError::Closed) => true,
            _ => false,
        }
    }
}
