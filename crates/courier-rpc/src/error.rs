use std::time::Duration;

use courier_shared::protocol::RpcErrorObject;
use thiserror::Error;

/// Errors produced by the daemon engine.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The daemon executable could not be launched.
    #[error("Failed to launch daemon {executable}: {source}")]
    Startup {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Daemon is already running")]
    AlreadyRunning,

    #[error("Daemon is not running")]
    NotRunning,

    /// The call was cancelled by an explicit stop.
    #[error("Daemon was stopped")]
    Stopped,

    #[error("Request {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The daemon answered with a JSON-RPC error object.
    #[error("Daemon error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The daemon process went away while the call was outstanding.
    #[error("Daemon exited (code {code:?})")]
    Exit { code: Option<i32> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RpcError {
    /// True for failures that are a direct consequence of stopping the engine.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, RpcError::Stopped | RpcError::NotRunning)
    }
}

impl From<RpcErrorObject> for RpcError {
    fn from(err: RpcErrorObject) -> Self {
        RpcError::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}
