use thiserror::Error;

/// Errors raised while decoding a line received from the daemon.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Response id is not an unsigned integer: {0}")]
    InvalidId(serde_json::Value),

    #[error("Malformed error object in response {id}: {reason}")]
    InvalidError { id: u64, reason: String },
}
