//! Peerlink negotiation client
//!
//! Drives one side of a two-party media session: a reconnecting signaling
//! socket to the relay, a negotiation state machine that runs the
//! offer/answer handshake, and a facade that ties both to local media.
//!
//! # Architecture
//!
//! ```text
//! ConnectionController
//!   ├── SignalingTransport ──(TransportEvent)──┐
//!   ├── MediaSource task ───(MediaAcquired)────┤
//!   └── PeerNegotiator  ◄──(NegotiatorEvent)───┤
//!         ├── CandidateBuffer                  │
//!         └── MediaTransport ──(media events)──┘
//! ```
//!
//! Every event source feeds one channel; the negotiator applies events one at
//! a time and publishes state, errors and [`ConnectionEvent`]s.
//!
//! # Usage
//!
//! ```rust,no_run
//! use peerlink_client::{ClientConfig, ConnectionController, MediaSource, RtcMediaTransportFactory};
//! use peerlink_protocol::Role;
//! use std::sync::Arc;
//!
//! # async fn example(camera: Arc<dyn MediaSource>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env();
//! let factory = Arc::new(RtcMediaTransportFactory::new());
//! let (mut controller, mut events) = ConnectionController::new(config, camera, factory);
//!
//! controller.initialize("ABCDEFGH", Role::Initiator).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod buffer;
mod config;
mod controller;
mod error;
mod media;
mod media_transport;
mod negotiator;
mod rtc;
mod state;
mod transport;

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

// Re-exports
pub use buffer::CandidateBuffer;
pub use config::{
    default_ice_servers, AudioConstraints, ClientConfig, IceServer, MediaConstraints,
    ReconnectPolicy, VideoConstraints,
};
pub use controller::{ConnectionController, MAX_SESSION_ID_LEN};
pub use error::{
    ConnectionError, ControllerError, ControllerResult, MediaError, MediaTransportError,
    MediaTransportResult, TransportError, TransportResult,
};
pub use media::{
    LocalMedia, LocalMediaInfo, LocalTrack, MediaSource, RemoteTrackInfo, TrackInfo, TrackKind,
};
pub use media_transport::{
    IceConnectionState, MediaEventSink, MediaTransport, MediaTransportEvent,
    MediaTransportFactory, PeerConnectionState,
};
pub use negotiator::{NegotiatorCommand, NegotiatorEvent, NegotiatorParams, PeerNegotiator};
pub use rtc::{RtcMediaTransport, RtcMediaTransportFactory};
pub use state::{ConnectionEvent, NegotiationState, NegotiatorObservers};
pub use transport::{SignalSender, SignalingTransport, TransportEvent};
