//! Signaling envelope

use crate::{
    error::ProtocolResult,
    payload::{
        CandidatePayload, DescriptionPayload, ErrorPayload, IceCandidate, JoinPayload,
        JoinedPayload, PeerInfo, PeerLeftPayload, Role, SessionDescription,
    },
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Kind of a signaling message
///
/// Only the kind drives interpretation; the relay never looks inside the
/// payload of pass-through kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// Client asks the relay to register it in a session
    Join,
    /// Relay confirms the join to the joining client
    Joined,
    /// Relay tells existing participants that someone joined
    PeerJoined,
    /// Session description offer (client to client)
    Offer,
    /// Session description answer (client to client)
    Answer,
    /// Network-path candidate (client to client)
    Candidate,
    /// Relay tells remaining participants that someone left
    PeerLeft,
    /// Relay reports a problem with a frame sent by this client
    Error,
}

impl MessageKind {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Joined => "joined",
            Self::PeerJoined => "peer-joined",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::PeerLeft => "peer-left",
            Self::Error => "error",
        }
    }

    /// Kinds a client may send and the relay forwards verbatim
    pub fn is_relayed(&self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::Candidate)
    }

    /// Kinds only the relay may originate
    pub fn is_relay_originated(&self) -> bool {
        matches!(
            self,
            Self::Joined | Self::PeerJoined | Self::PeerLeft | Self::Error
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session-scoped signaling frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    /// Session the message belongs to (empty for connection-level errors)
    #[serde(default)]
    pub session_id: String,

    /// Message kind
    pub kind: MessageKind,

    /// Opaque payload; typed access through [`SignalingMessage::payload_as`]
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SignalingMessage {
    /// Build a message from any serializable payload
    pub fn new<P: Serialize>(
        session_id: impl Into<String>,
        kind: MessageKind,
        payload: &P,
    ) -> ProtocolResult<Self> {
        Ok(Self {
            session_id: session_id.into(),
            kind,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Decode the payload into a typed struct
    pub fn payload_as<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(T::deserialize(&self.payload)?)
    }

    /// Serialize to a text frame
    pub fn to_text(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a text frame
    pub fn from_text(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// `join` request
    pub fn join(session_id: &str, role: Role) -> ProtocolResult<Self> {
        let payload = JoinPayload {
            session_id: session_id.to_string(),
            role,
        };
        Self::new(session_id, MessageKind::Join, &payload)
    }

    /// `joined` confirmation
    pub fn joined(
        session_id: &str,
        current_participant_count: usize,
        peers: Vec<PeerInfo>,
    ) -> ProtocolResult<Self> {
        let payload = JoinedPayload {
            session_id: session_id.to_string(),
            current_participant_count,
            peers,
        };
        Self::new(session_id, MessageKind::Joined, &payload)
    }

    /// `peer-joined` notification
    pub fn peer_joined(session_id: &str, peer: PeerInfo) -> ProtocolResult<Self> {
        Self::new(session_id, MessageKind::PeerJoined, &peer)
    }

    /// `peer-left` notification
    pub fn peer_left(session_id: &str, handle: &str, role: Role) -> ProtocolResult<Self> {
        let payload = PeerLeftPayload {
            handle: handle.to_string(),
            role: Some(role),
        };
        Self::new(session_id, MessageKind::PeerLeft, &payload)
    }

    /// `offer` carrying a session description
    pub fn offer(session_id: &str, sdp: SessionDescription) -> ProtocolResult<Self> {
        let payload = DescriptionPayload {
            session_id: session_id.to_string(),
            sdp,
        };
        Self::new(session_id, MessageKind::Offer, &payload)
    }

    /// `answer` carrying a session description
    pub fn answer(session_id: &str, sdp: SessionDescription) -> ProtocolResult<Self> {
        let payload = DescriptionPayload {
            session_id: session_id.to_string(),
            sdp,
        };
        Self::new(session_id, MessageKind::Answer, &payload)
    }

    /// `candidate` carrying one network-path candidate
    pub fn candidate(session_id: &str, candidate: IceCandidate) -> ProtocolResult<Self> {
        let payload = CandidatePayload {
            session_id: session_id.to_string(),
            candidate,
        };
        Self::new(session_id, MessageKind::Candidate, &payload)
    }

    /// `error` report
    pub fn error(session_id: &str, message: impl Into<String>) -> ProtocolResult<Self> {
        let payload = ErrorPayload {
            message: message.into(),
        };
        Self::new(session_id, MessageKind::Error, &payload)
    }
}
