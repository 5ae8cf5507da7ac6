//! Media transport seam
//!
//! The negotiator drives a [`MediaTransport`] through offer/answer and
//! candidate exchange. Implementations report asynchronous happenings through
//! the [`MediaEventSink`] they were built with; every event carries the
//! generation of the transport that produced it so the negotiator can discard
//! events from a transport it already replaced.

use crate::{
    config::IceServer,
    error::MediaTransportResult,
    media::{LocalTrack, RemoteTrackInfo},
    negotiator::NegotiatorEvent,
};
use async_trait::async_trait;
use peerlink_protocol::{IceCandidate, SessionDescription};
use std::{fmt, sync::Arc};
use tokio::sync::mpsc;

/// Connectivity-check state of the media path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    /// Gathering not started
    New,
    /// Checks running
    Checking,
    /// A working pair was found
    Connected,
    /// All checks finished
    Completed,
    /// Path lost, may recover
    Disconnected,
    /// Checks failed
    Failed,
    /// Transport closed
    Closed,
}

/// Overall state of the media connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    /// Not started
    New,
    /// Connecting
    Connecting,
    /// Media can flow
    Connected,
    /// Temporarily interrupted
    Disconnected,
    /// Gave up
    Failed,
    /// Closed locally
    Closed,
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Something the media transport observed
#[derive(Debug, Clone, PartialEq)]
pub enum MediaTransportEvent {
    /// A local candidate was gathered and should go to the peer
    LocalCandidate(IceCandidate),
    /// Connectivity-check state changed
    IceConnectionState(IceConnectionState),
    /// Overall connection state changed
    ConnectionState(PeerConnectionState),
    /// Remote media arrived
    RemoteTrack(RemoteTrackInfo),
}

/// Where a media transport reports its events
#[derive(Debug, Clone)]
pub struct MediaEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<NegotiatorEvent>,
}

impl MediaEventSink {
    /// Sink tagged with the generation of the transport it belongs to
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<NegotiatorEvent>) -> Self {
        Self { generation, tx }
    }

    /// Generation tag
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event; silently dropped once the negotiator is gone
    pub fn emit(&self, event: MediaTransportEvent) {
        let _ = self.tx.send(NegotiatorEvent::Media {
            generation: self.generation,
            event,
        });
    }
}

/// The underlying media-transport object of one negotiation
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Attach a local track so it is offered to the peer
    async fn add_local_track(&self, track: Arc<dyn LocalTrack>) -> MediaTransportResult<()>;

    /// Produce an offer; `ice_restart` requests fresh ICE credentials
    async fn create_offer(&self, ice_restart: bool) -> MediaTransportResult<SessionDescription>;

    /// Produce an answer to the applied remote offer
    async fn create_answer(&self) -> MediaTransportResult<SessionDescription>;

    /// Apply a locally created description
    async fn set_local_description(&self, description: SessionDescription) -> MediaTransportResult<()>;

    /// Apply the peer's description
    async fn set_remote_description(&self, description: SessionDescription) -> MediaTransportResult<()>;

    /// Apply one of the peer's candidates
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> MediaTransportResult<()>;

    /// Restart connectivity checks in place
    async fn restart_ice(&self) -> MediaTransportResult<()>;

    /// Close the transport; safe to call more than once
    async fn close(&self) -> MediaTransportResult<()>;
}

/// Builds media transports for the negotiator
#[async_trait]
pub trait MediaTransportFactory: Send + Sync {
    /// Create a transport using `ice_servers` for candidate gathering
    async fn create(
        &self,
        ice_servers: &[IceServer],
        sink: MediaEventSink,
    ) -> MediaTransportResult<Arc<dyn MediaTransport>>;
}
