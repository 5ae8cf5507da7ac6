//! Observable connection state

use crate::{
    error::ConnectionError,
    media::{LocalMediaInfo, RemoteTrackInfo},
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tokio::sync::{mpsc, watch};

/// State of one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationState {
    /// Nothing started
    New,
    /// Media and signaling are being set up
    Initializing,
    /// Both ready; handshake in progress
    Connecting,
    /// Remote media is flowing
    Connected,
    /// Peer left or the attempt was disconnected
    Disconnected,
    /// Attempt failed; `retry` is the way out
    Failed,
    /// Attempt disposed
    Closed,
}

impl NegotiationState {
    /// Wire/UI name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// Handshake underway or done
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event delivered to the controller's consumer
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// State transition
    StateChanged(NegotiationState),
    /// Local media acquired
    LocalMedia(LocalMediaInfo),
    /// Remote media arrived
    RemoteTrack(RemoteTrackInfo),
    /// Error published to the error slot
    Error(ConnectionError),
}

/// Slots and channel the negotiator publishes into
#[derive(Clone)]
pub struct NegotiatorObservers {
    /// Single state slot
    pub state: Arc<watch::Sender<NegotiationState>>,
    /// Single error slot
    pub error: Arc<watch::Sender<Option<ConnectionError>>>,
    /// Event stream
    pub events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl NegotiatorObservers {
    /// Fresh slots plus the receiving end of the event stream
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (state, _) = watch::channel(NegotiationState::New);
        let (error, _) = watch::channel(None);
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(state),
                error: Arc::new(error),
                events,
            },
            rx,
        )
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    /// Last published error
    pub fn last_error(&self) -> Option<ConnectionError> {
        self.error.borrow().clone()
    }

    pub(crate) fn publish_state(&self, state: NegotiationState) {
        self.state.send_replace(state);
        let _ = self.events.send(ConnectionEvent::StateChanged(state));
    }

    pub(crate) fn publish_error(&self, error: ConnectionError) {
        self.error.send_replace(Some(error.clone()));
        let _ = self.events.send(ConnectionEvent::Error(error));
    }

    pub(crate) fn publish(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}
