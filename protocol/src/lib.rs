//! Peerlink signaling protocol
//!
//! Wire types shared by the relay server and the negotiation client.
//!
//! # Architecture
//!
//! Every frame on the signaling socket is a JSON [`SignalingMessage`]:
//!
//! ```json
//! {"sessionId": "ABCDEFGH", "kind": "offer", "payload": {"sessionId": "ABCDEFGH", "sdp": {"type": "offer", "sdp": "v=0..."}}}
//! ```
//!
//! The relay only reads `sessionId` and `kind`; the `payload` is passed through
//! verbatim to the other participant. Typed payload structs live in
//! [`payload`] and are decoded by the endpoints with
//! [`SignalingMessage::payload_as`].
//!
//! # Usage
//!
//! ```rust
//! use peerlink_protocol::{MessageKind, Role, SignalingMessage};
//!
//! let join = SignalingMessage::join("ABCDEFGH", Role::Initiator).unwrap();
//! assert_eq!(join.kind, MessageKind::Join);
//!
//! let text = join.to_text().unwrap();
//! let parsed = SignalingMessage::from_text(&text).unwrap();
//! assert_eq!(parsed.session_id, "ABCDEFGH");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod message;
pub mod payload;
mod session_id;

// Re-exports
pub use error::{ProtocolError, ProtocolResult};
pub use message::{MessageKind, SignalingMessage};
pub use payload::{
    CandidatePayload, DescriptionPayload, ErrorPayload, IceCandidate, JoinPayload, JoinedPayload,
    PeerInfo, PeerLeftPayload, Role, SdpType, SessionDescription,
};
pub use session_id::{
    generate_session_id, validate_session_id, SESSION_ID_ALPHABET, SESSION_ID_LEN,
};
