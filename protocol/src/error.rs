//! Error types for protocol encoding and validation

use thiserror::Error;

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or validating signaling frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame or payload is not valid JSON for the expected shape
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Session id failed validation
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// Role string is not one of the known roles
    #[error("Unknown role: {0}")]
    UnknownRole(String),
}
