//! Connection controller - public lifecycle of a two-party session
//!
//! The controller owns at most one attempt at a time. An attempt is a fresh
//! [`SignalingTransport`], a [`PeerNegotiator`] running on its own task, a
//! forwarder that feeds transport events into the negotiator, and the local
//! media acquisition task. State and errors are published through the
//! [`NegotiatorObservers`] slots, which outlive individual attempts.

use crate::{
    config::ClientConfig,
    error::{ConnectionError, ControllerError, ControllerResult},
    media::{MediaSource, TrackKind},
    media_transport::MediaTransportFactory,
    negotiator::{NegotiatorCommand, NegotiatorEvent, NegotiatorParams, PeerNegotiator},
    state::{ConnectionEvent, NegotiationState, NegotiatorObservers},
    transport::SignalingTransport,
};
use peerlink_protocol::{validate_session_id, Role};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Longest session id the controller accepts, matching the relay default
pub const MAX_SESSION_ID_LEN: usize = 128;

struct Attempt {
    session_id: String,
    role: Role,
    transport: SignalingTransport,
    events: mpsc::UnboundedSender<NegotiatorEvent>,
    cancel: CancellationToken,
    negotiator: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

/// Facade over transport, negotiator and media for one user session
pub struct ConnectionController {
    config: ClientConfig,
    media_source: Arc<dyn MediaSource>,
    factory: Arc<dyn MediaTransportFactory>,
    observers: NegotiatorObservers,
    attempt: Option<Attempt>,
    last_target: Option<(String, Role)>,
}

impl ConnectionController {
    /// Create an idle controller and the receiver for its events
    pub fn new(
        config: ClientConfig,
        media_source: Arc<dyn MediaSource>,
        factory: Arc<dyn MediaTransportFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (observers, events) = NegotiatorObservers::new();
        (
            Self {
                config,
                media_source,
                factory,
                observers,
                attempt: None,
                last_target: None,
            },
            events,
        )
    }

    /// Start an attempt for `session_id` in `role`
    ///
    /// Media acquisition and the relay connect run concurrently; progress is
    /// reported through the state slot.
    pub async fn initialize(&mut self, session_id: &str, role: Role) -> ControllerResult<()> {
        if self.attempt.is_some() {
            return Err(ControllerError::AlreadyActive);
        }

        validate_session_id(session_id, MAX_SESSION_ID_LEN)
            .map_err(|e| ControllerError::InvalidSession(e.to_string()))?;
        self.config
            .validate()
            .map_err(ControllerError::InvalidConfig)?;

        self.last_target = Some((session_id.to_string(), role));
        self.observers.error.send_replace(None);

        tracing::info!(session_id = %session_id, role = %role, "Initializing connection");

        let (transport, mut transport_events) = SignalingTransport::new(&self.config);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut negotiator = PeerNegotiator::new(NegotiatorParams {
            session_id: session_id.to_string(),
            role,
            ice_servers: self.config.ice_servers.clone(),
            ice_restart_timeout: self.config.ice_restart_timeout,
            signal: Arc::new(transport.clone()),
            factory: self.factory.clone(),
            events: events_tx.clone(),
            observers: self.observers.clone(),
        });

        if let Err(e) = negotiator.initialize().await {
            tracing::error!(session_id = %session_id, error = %e, "Failed to create media transport");
            self.observers
                .publish_error(ConnectionError::Negotiation(e.to_string()));
            self.observers.publish_state(NegotiationState::Failed);
            return Err(e.into());
        }

        let cancel = CancellationToken::new();
        let negotiator = tokio::spawn(negotiator.run(events_rx, cancel.clone()));

        let forward_tx = events_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = transport_events.recv().await {
                if forward_tx.send(NegotiatorEvent::Transport(event)).is_err() {
                    break;
                }
            }
        });

        // Detached: if the loop is gone by the time media arrives, the send
        // fails and the tracks are stopped here
        let source = self.media_source.clone();
        let constraints = self.config.media.clone();
        let media_tx = events_tx.clone();
        tokio::spawn(async move {
            let result = source.acquire(&constraints).await;
            if let Err(mpsc::error::SendError(NegotiatorEvent::MediaAcquired(Ok(media)))) =
                media_tx.send(NegotiatorEvent::MediaAcquired(result))
            {
                media.stop_all();
            }
        });

        transport.connect();

        self.attempt = Some(Attempt {
            session_id: session_id.to_string(),
            role,
            transport,
            events: events_tx,
            cancel,
            negotiator,
            forwarder,
        });

        Ok(())
    }

    /// Tear the current attempt down
    ///
    /// Releases local media, closes the media transport, then closes the
    /// signaling transport. Safe to call repeatedly and in any state.
    pub async fn disconnect(&mut self) {
        let Some(attempt) = self.attempt.take() else {
            tracing::debug!("Disconnect requested with no active attempt");
            return;
        };

        tracing::info!(session_id = %attempt.session_id, role = %attempt.role, "Disconnecting");

        let (reply, done) = oneshot::channel();
        let command = NegotiatorEvent::Command(NegotiatorCommand::Shutdown { reply });
        if attempt.events.send(command).is_ok()
            && tokio::time::timeout(self.config.shutdown_timeout, done)
                .await
                .is_err()
        {
            tracing::warn!(session_id = %attempt.session_id, "Negotiator did not acknowledge shutdown in time");
        }

        attempt.cancel.cancel();
        attempt.transport.shutdown().await;
        attempt.forwarder.abort();

        if tokio::time::timeout(self.config.shutdown_timeout, attempt.negotiator)
            .await
            .is_err()
        {
            tracing::warn!(session_id = %attempt.session_id, "Negotiation loop did not stop in time");
        }
    }

    /// Tear down, wait `retry_delay`, and initialize the last session again
    pub async fn retry(&mut self) -> ControllerResult<()> {
        let (session_id, role) = self
            .last_target
            .clone()
            .ok_or(ControllerError::NothingToRetry)?;

        tracing::info!(session_id = %session_id, "Retrying connection");

        self.disconnect().await;
        tokio::time::sleep(self.config.retry_delay).await;
        self.initialize(&session_id, role).await
    }

    /// Flip the local video track; returns the new enabled flag
    pub async fn toggle_video(&self) -> bool {
        self.toggle(TrackKind::Video).await
    }

    /// Flip the local audio track; returns the new enabled flag
    pub async fn toggle_audio(&self) -> bool {
        self.toggle(TrackKind::Audio).await
    }

    async fn toggle(&self, kind: TrackKind) -> bool {
        let Some(attempt) = &self.attempt else {
            return false;
        };

        let (reply, enabled) = oneshot::channel();
        let command = NegotiatorEvent::Command(NegotiatorCommand::ToggleTrack { kind, reply });
        if attempt.events.send(command).is_err() {
            return false;
        }
        enabled.await.unwrap_or(false)
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        self.observers.state()
    }

    /// Watch the state slot
    pub fn subscribe_state(&self) -> watch::Receiver<NegotiationState> {
        self.observers.state.subscribe()
    }

    /// Last published error, cleared on `initialize`
    pub fn last_error(&self) -> Option<ConnectionError> {
        self.observers.error.borrow().clone()
    }

    /// Session of the live attempt
    pub fn session_id(&self) -> Option<&str> {
        self.attempt.as_ref().map(|a| a.session_id.as_str())
    }

    /// Whether an attempt is live
    pub fn is_active(&self) -> bool {
        self.attempt.is_some()
    }

    /// Whether the signaling socket of the live attempt is open
    pub fn is_signaling_connected(&self) -> bool {
        self.attempt
            .as_ref()
            .map(|a| a.transport.is_connected())
            .unwrap_or(false)
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            // The loop tears down on cancellation
            attempt.cancel.cancel();
            attempt.transport.disconnect();
            attempt.forwarder.abort();
        }
    }
}
