//! Error types for relay operations
//!
//! Mirrors the API error handling with RFC 7807 Problem Details support.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors that can occur while handling signaling frames
///
/// None of these are fatal to the relay; they are reported to the sender as an
/// `error` message and the offending frame is dropped.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Frame could not be parsed
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame exceeds the configured size
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Size of the rejected frame
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Session id failed validation
    #[error("Invalid session id: {0}")]
    InvalidSession(String),

    /// Session already holds the maximum number of participants
    #[error("session {session_id} is full")]
    SessionFull {
        /// Session that refused the join
        session_id: String,
        /// Admission cap
        max: usize,
    },

    /// No live session with this id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Sender is not registered in the session named by the frame
    #[error("Not joined to session {0}")]
    NotInSession(String),

    /// Client sent a kind only the relay may originate
    #[error("Message kind '{0}' cannot be sent by clients")]
    ForbiddenKind(String),

    /// Internal failure (bind, serve)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// RFC 7807 Problem Details response for relay errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// URI reference identifying the problem type
    #[serde(rename = "type")]
    pub type_uri: String,

    /// Short, human-readable summary
    pub title: String,

    /// Status code (HTTP-like)
    pub status: u16,

    /// Human-readable explanation
    pub detail: String,

    /// Session id the problem relates to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl RelayError {
    /// Convert to RFC 7807 Problem Details
    pub fn to_problem_details(&self, session_id: Option<String>) -> ProblemDetails {
        let (status, title) = match self {
            Self::MalformedFrame(_) | Self::InvalidSession(_) => (400, "Bad Request"),
            Self::FrameTooLarge { .. } => (413, "Payload Too Large"),
            Self::NotInSession(_) | Self::ForbiddenKind(_) => (403, "Forbidden"),
            Self::SessionNotFound(_) => (404, "Not Found"),
            Self::SessionFull { .. } => (409, "Conflict"),
            Self::Internal(_) => (500, "Internal Server Error"),
        };

        ProblemDetails {
            type_uri: format!(
                "https://peerlink.dev/errors/{}",
                title.replace(' ', "-").to_lowercase()
            ),
            title: title.to_string(),
            status,
            detail: self.to_string(),
            instance: session_id,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let instance = match &self {
            Self::SessionNotFound(id) | Self::NotInSession(id) => Some(id.clone()),
            Self::SessionFull { session_id, .. } => Some(session_id.clone()),
            _ => None,
        };
        let problem = self.to_problem_details(instance);
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status, Json(problem)).into_response()
    }
}

impl From<peerlink_protocol::ProtocolError> for RelayError {
    fn from(err: peerlink_protocol::ProtocolError) -> Self {
        match err {
            peerlink_protocol::ProtocolError::InvalidSessionId(msg) => Self::InvalidSession(msg),
            other => Self::MalformedFrame(other.to_string()),
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
