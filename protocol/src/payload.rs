//! Typed payloads carried inside [`SignalingMessage`](crate::SignalingMessage)

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Handshake role of a participant
///
/// The initiator always creates the offer once a responder is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Creates the offer
    #[serde(rename = "initiator", alias = "interviewer")]
    Initiator,
    /// Answers the offer
    #[serde(rename = "responder", alias = "candidate")]
    Responder,
}

impl Role {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiator => "initiator",
            Self::Responder => "responder",
        }
    }

    /// The role on the other end of the handshake
    pub fn counterpart(&self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initiator" | "interviewer" => Ok(Self::Initiator),
            "responder" | "candidate" => Ok(Self::Responder),
            other => Err(ProtocolError::UnknownRole(other.to_string())),
        }
    }
}

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer
    Answer,
    /// Rollback of a pending description
    Rollback,
}

/// Session description exchanged during the offer/answer handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Create a description
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }
}

/// Network-path candidate
///
/// Field names follow the browser `RTCIceCandidateInit` JSON form so the
/// relay can sit between native and browser endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate string (SDP attribute form)
    pub candidate: String,

    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Media line index
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,

    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the candidate line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// `join` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    /// Session to join (falls back to the envelope's session id when empty)
    #[serde(default)]
    pub session_id: String,
    /// Role of the joining participant
    pub role: Role,
}

/// Another participant as seen by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Role the participant joined with
    pub role: Role,
    /// Opaque connection handle
    pub handle: String,
}

/// `joined` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedPayload {
    /// Session joined
    pub session_id: String,
    /// Participant count including the joiner
    pub current_participant_count: usize,
    /// Participants that were already present
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
}

/// `offer` / `answer` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionPayload {
    /// Session the description belongs to
    pub session_id: String,
    /// The description
    pub sdp: SessionDescription,
}

/// `candidate` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    /// Session the candidate belongs to
    pub session_id: String,
    /// The candidate
    pub candidate: IceCandidate,
}

/// `peer-left` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerLeftPayload {
    /// Handle of the participant that left
    pub handle: String,
    /// Role it had joined with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// `error` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable description
    pub message: String,
}
