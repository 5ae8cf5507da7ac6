//! Error types for the negotiation client

use std::time::Duration;
use thiserror::Error;

/// Result type for signaling transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for media transport operations
pub type MediaTransportResult<T> = Result<T, MediaTransportError>;

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Failure of a single signaling connect attempt
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket handshake failed
    #[error("Failed to connect to relay: {0}")]
    Connect(String),

    /// Handshake did not finish in time
    #[error("Connect attempt timed out after {0:?}")]
    Timeout(Duration),
}

/// Local media acquisition failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// User or platform refused access
    #[error("Camera/microphone access denied. Please allow camera and microphone access and try again.")]
    PermissionDenied,

    /// No capture device available
    #[error("Camera/microphone access denied. No camera or microphone found on this device.")]
    DeviceNotFound,

    /// Anything else the capture layer reports
    #[error("Camera/microphone access denied. {0}")]
    Other(String),
}

/// Failure reported by a [`MediaTransport`](crate::MediaTransport)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaTransportError {
    /// Session description could not be parsed or applied
    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    /// Candidate could not be applied
    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),

    /// Transport already closed
    #[error("Media transport is closed")]
    Closed,

    /// Underlying engine failure
    #[error("Media transport error: {0}")]
    Internal(String),
}

/// User-facing error published in the controller's error slot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Relay unreachable after the reconnect budget was spent
    #[error("Could not reach the signaling server after {attempts} attempts")]
    TransportExhausted {
        /// Retries made
        attempts: u32,
    },

    /// Media permission refused
    #[error("{}", MediaError::PermissionDenied)]
    MediaPermissionDenied,

    /// No capture device
    #[error("{}", MediaError::DeviceNotFound)]
    MediaDeviceNotFound,

    /// Other media failure
    #[error("Media error: {0}")]
    Media(String),

    /// Offer/answer could not be produced or applied
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Connectivity check failed again after an ICE restart
    #[error("Network path to the peer could not be established")]
    ConnectivityFailed,

    /// Media transport reported overall failure
    #[error("Connection failed. Please refresh and try again.")]
    ConnectionFailed,

    /// Relay sent an `error` message
    #[error("Signaling error: {0}")]
    Signaling(String),
}

impl ConnectionError {
    /// Whether this error ends the current attempt
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::Signaling(_) | Self::MediaPermissionDenied | Self::MediaDeviceNotFound | Self::Media(_)
        )
    }
}

impl From<MediaError> for ConnectionError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::PermissionDenied => Self::MediaPermissionDenied,
            MediaError::DeviceNotFound => Self::MediaDeviceNotFound,
            MediaError::Other(msg) => Self::Media(msg),
        }
    }
}

/// Errors returned by [`ConnectionController`](crate::ConnectionController) calls
#[derive(Debug, Error)]
pub enum ControllerError {
    /// An attempt is already live; disconnect first
    #[error("A connection attempt is already active")]
    AlreadyActive,

    /// `retry` called before any `initialize`
    #[error("Nothing to retry: no previous session")]
    NothingToRetry,

    /// Session id rejected
    #[error("Invalid session id: {0}")]
    InvalidSession(String),

    /// Client configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Media transport could not be created
    #[error("Setup failed: {0}")]
    Setup(#[from] MediaTransportError),
}
