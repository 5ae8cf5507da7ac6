//! Negotiation state machine
//!
//! One [`PeerNegotiator`] exists per connection attempt. Events from the
//! signaling transport, the media-acquisition task and the media transport
//! are funnelled into one channel and applied one at a time by
//! [`PeerNegotiator::run`], so a transition is never interleaved with another.
//!
//! Roles are asymmetric: the initiator offers as soon as it learns a
//! responder is in the session; the responder answers. Candidates that arrive
//! before a remote description is applied wait in a [`CandidateBuffer`] and
//! are flushed, in arrival order, right after the description is applied.

use crate::{
    buffer::CandidateBuffer,
    config::IceServer,
    error::{ConnectionError, MediaError, MediaTransportError},
    media::{LocalMedia, TrackKind},
    media_transport::{
        IceConnectionState, MediaEventSink, MediaTransport, MediaTransportEvent,
        MediaTransportFactory, PeerConnectionState,
    },
    state::{ConnectionEvent, NegotiationState, NegotiatorObservers},
    transport::{SignalSender, TransportEvent},
};
use peerlink_protocol::{
    CandidatePayload, DescriptionPayload, ErrorPayload, IceCandidate, JoinedPayload, MessageKind,
    PeerInfo, PeerLeftPayload, Role, SessionDescription, SignalingMessage,
};
use std::{ops::ControlFlow, sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Request from the controller to the running negotiator
#[derive(Debug)]
pub enum NegotiatorCommand {
    /// Flip a local track; replies with the new enabled flag
    ToggleTrack {
        /// Track kind
        kind: TrackKind,
        /// Reply channel
        reply: oneshot::Sender<bool>,
    },
    /// Release media, close the media transport and stop the loop
    Shutdown {
        /// Signalled once teardown finished
        reply: oneshot::Sender<()>,
    },
}

/// Everything the negotiation loop reacts to
#[derive(Debug)]
pub enum NegotiatorEvent {
    /// From the signaling transport
    Transport(TransportEvent),
    /// Outcome of local media acquisition
    MediaAcquired(Result<LocalMedia, MediaError>),
    /// From the media transport of the given generation
    Media {
        /// Generation of the reporting transport
        generation: u64,
        /// What it reported
        event: MediaTransportEvent,
    },
    /// The ICE restart started on the given generation ran out of time
    RestartDeadline {
        /// Generation the restart was started on
        generation: u64,
    },
    /// From the controller
    Command(NegotiatorCommand),
}

/// Construction parameters for a [`PeerNegotiator`]
pub struct NegotiatorParams {
    /// Session to negotiate in
    pub session_id: String,
    /// Our role
    pub role: Role,
    /// Ordered ICE servers for the media transport
    pub ice_servers: Vec<IceServer>,
    /// Time allowed for an ICE restart to reconnect
    pub ice_restart_timeout: Duration,
    /// Outbound signaling
    pub signal: Arc<dyn SignalSender>,
    /// Builds media transports
    pub factory: Arc<dyn MediaTransportFactory>,
    /// Sender side of the loop's own channel, handed to media transports
    pub events: mpsc::UnboundedSender<NegotiatorEvent>,
    /// Where state, errors and events are published
    pub observers: NegotiatorObservers,
}

/// Handshake driver for one connection attempt
pub struct PeerNegotiator {
    session_id: String,
    role: Role,
    ice_servers: Vec<IceServer>,
    ice_restart_timeout: Duration,
    signal: Arc<dyn SignalSender>,
    factory: Arc<dyn MediaTransportFactory>,
    events: mpsc::UnboundedSender<NegotiatorEvent>,
    observers: NegotiatorObservers,

    state: NegotiationState,
    generation: u64,
    media_transport: Option<Arc<dyn MediaTransport>>,
    local_media: Option<LocalMedia>,
    buffer: CandidateBuffer,

    transport_connected: bool,
    remote_description_set: bool,
    awaiting_answer: bool,
    /// Set once the single allowed ICE restart was used
    ice_restarted: bool,
    /// A restart was requested and the path has not recovered yet
    restart_in_flight: bool,
}

impl PeerNegotiator {
    /// Create a negotiator in state `new`
    pub fn new(params: NegotiatorParams) -> Self {
        Self {
            session_id: params.session_id,
            role: params.role,
            ice_servers: params.ice_servers,
            ice_restart_timeout: params.ice_restart_timeout,
            signal: params.signal,
            factory: params.factory,
            events: params.events,
            observers: params.observers,
            state: NegotiationState::New,
            generation: 0,
            media_transport: None,
            local_media: None,
            buffer: CandidateBuffer::new(),
            transport_connected: false,
            remote_description_set: false,
            awaiting_answer: false,
            ice_restarted: false,
            restart_in_flight: false,
        }
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Generation of the current media transport (0 before `initialize`)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Candidates waiting for a remote description
    pub fn buffered_candidates(&self) -> usize {
        self.buffer.len()
    }

    /// Enter `initializing` and build the first media transport
    pub async fn initialize(&mut self) -> Result<(), MediaTransportError> {
        self.set_state(NegotiationState::Initializing);
        self.build_media_transport().await
    }

    /// Process events until shutdown, cancellation or channel close
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<NegotiatorEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if self.handle(event).await.is_break() {
                break;
            }
        }

        if self.state != NegotiationState::Closed {
            self.teardown().await;
        }

        // Media that arrived after the loop stopped still has to be released
        events.close();
        while let Ok(event) = events.try_recv() {
            match event {
                NegotiatorEvent::MediaAcquired(Ok(media)) => media.stop_all(),
                NegotiatorEvent::Command(NegotiatorCommand::Shutdown { reply }) => {
                    let _ = reply.send(());
                }
                NegotiatorEvent::Command(NegotiatorCommand::ToggleTrack { reply, .. }) => {
                    let _ = reply.send(false);
                }
                _ => {}
            }
        }

        tracing::debug!(session_id = %self.session_id, "Negotiation loop stopped");
    }

    /// Apply one event
    pub async fn handle(&mut self, event: NegotiatorEvent) -> ControlFlow<()> {
        match event {
            NegotiatorEvent::Transport(event) => self.on_transport(event).await,
            NegotiatorEvent::MediaAcquired(result) => self.on_media_acquired(result).await,
            NegotiatorEvent::Media { generation, event } => {
                if generation != self.generation {
                    tracing::debug!(
                        generation,
                        current = self.generation,
                        "Discarding event from replaced media transport"
                    );
                } else {
                    self.on_media_event(event).await;
                }
            }
            NegotiatorEvent::RestartDeadline { generation } => {
                if generation == self.generation && self.restart_in_flight {
                    tracing::warn!(
                        session_id = %self.session_id,
                        timeout = ?self.ice_restart_timeout,
                        "ICE restart did not recover the connection"
                    );
                    self.fail(ConnectionError::ConnectionFailed);
                }
            }
            NegotiatorEvent::Command(NegotiatorCommand::ToggleTrack { kind, reply }) => {
                let enabled = self
                    .local_media
                    .as_ref()
                    .map(|media| media.toggle(kind))
                    .unwrap_or(false);
                tracing::debug!(kind = %kind, enabled, "Local track toggled");
                let _ = reply.send(enabled);
            }
            NegotiatorEvent::Command(NegotiatorCommand::Shutdown { reply }) => {
                self.teardown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.transport_connected = true;
                self.maybe_start_connecting();
            }
            TransportEvent::Disconnected { reason } => {
                self.transport_connected = false;
                tracing::info!(session_id = %self.session_id, reason = %reason, "Signaling lost, waiting for reconnect");
            }
            TransportEvent::Exhausted { attempts } => {
                self.transport_connected = false;
                self.fail(ConnectionError::TransportExhausted { attempts });
            }
            TransportEvent::Message(message) => self.on_signal(message).await,
        }
    }

    async fn on_media_acquired(&mut self, result: Result<LocalMedia, MediaError>) {
        let media = match result {
            Ok(media) => media,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "Local media unavailable");
                self.observers.publish_error(e.into());
                return;
            }
        };

        if matches!(self.state, NegotiationState::Closed) {
            media.stop_all();
            return;
        }

        if let Some(transport) = self.media_transport.clone() {
            for track in media.tracks() {
                if let Err(e) = transport.add_local_track(track.clone()).await {
                    tracing::error!(track = %track.id(), error = %e, "Failed to attach local track");
                    self.observers.publish_error(ConnectionError::Media(e.to_string()));
                }
            }
        }

        self.observers
            .publish(ConnectionEvent::LocalMedia(media.info()));
        self.local_media = Some(media);

        // Join only once there is something to send
        self.signal.join(&self.session_id, self.role);
        self.maybe_start_connecting();
    }

    fn maybe_start_connecting(&mut self) {
        if self.state == NegotiationState::Initializing
            && self.local_media.is_some()
            && self.transport_connected
        {
            self.set_state(NegotiationState::Connecting);
        }
    }

    async fn on_signal(&mut self, message: SignalingMessage) {
        if message.kind != MessageKind::Error && message.session_id != self.session_id {
            tracing::debug!(
                session_id = %message.session_id,
                kind = %message.kind,
                "Ignoring frame for another session"
            );
            return;
        }

        match message.kind {
            MessageKind::Joined => match message.payload_as::<JoinedPayload>() {
                Ok(joined) => {
                    tracing::info!(
                        session_id = %self.session_id,
                        count = joined.current_participant_count,
                        "Joined session"
                    );
                    let responder_waiting =
                        joined.peers.iter().any(|p| p.role == Role::Responder);
                    if self.role == Role::Initiator && responder_waiting {
                        self.offer_to_new_peer().await;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Malformed joined payload"),
            },
            MessageKind::PeerJoined => match message.payload_as::<PeerInfo>() {
                Ok(peer) => {
                    tracing::info!(session_id = %self.session_id, role = %peer.role, handle = %peer.handle, "Peer joined");
                    if self.role == Role::Initiator && peer.role == Role::Responder {
                        self.offer_to_new_peer().await;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Malformed peer-joined payload"),
            },
            MessageKind::Offer => self.on_offer(&message).await,
            MessageKind::Answer => self.on_answer(&message).await,
            MessageKind::Candidate => self.on_remote_candidate(&message).await,
            MessageKind::PeerLeft => {
                let left = message.payload_as::<PeerLeftPayload>().ok();
                tracing::info!(
                    session_id = %self.session_id,
                    handle = ?left.as_ref().map(|l| l.handle.as_str()),
                    "Peer left"
                );
                self.awaiting_answer = false;
                if self.state.is_active() {
                    self.set_state(NegotiationState::Disconnected);
                }
            }
            MessageKind::Error => {
                let text = message
                    .payload_as::<ErrorPayload>()
                    .map(|e| e.message)
                    .unwrap_or_else(|_| "unknown relay error".to_string());
                tracing::warn!(session_id = %self.session_id, message = %text, "Relay reported an error");
                self.observers.publish_error(ConnectionError::Signaling(text));
            }
            MessageKind::Join => {
                tracing::warn!("Relay echoed a join request, ignoring");
            }
        }
    }

    /// Initiator side: a responder is present, start a fresh handshake
    async fn offer_to_new_peer(&mut self) {
        match self.state {
            NegotiationState::Connecting if !self.remote_description_set && !self.awaiting_answer => {}
            NegotiationState::Connecting
            | NegotiationState::Connected
            | NegotiationState::Disconnected => {
                if self.rebuild().await.is_err() {
                    return;
                }
            }
            other => {
                tracing::debug!(state = %other, "Not ready to offer");
                return;
            }
        }

        self.send_offer(false).await;
    }

    async fn send_offer(&mut self, ice_restart: bool) {
        let Some(transport) = self.media_transport.clone() else {
            return;
        };

        let offer = match transport.create_offer(ice_restart).await {
            Ok(offer) => offer,
            Err(e) => return self.fail(ConnectionError::Negotiation(e.to_string())),
        };
        if let Err(e) = transport.set_local_description(offer.clone()).await {
            return self.fail(ConnectionError::Negotiation(e.to_string()));
        }

        match SignalingMessage::offer(&self.session_id, offer) {
            Ok(message) => self.signal.send(&message),
            Err(e) => return self.fail(ConnectionError::Negotiation(e.to_string())),
        }

        self.awaiting_answer = true;
        tracing::info!(session_id = %self.session_id, ice_restart, "Offer sent");
    }

    async fn on_offer(&mut self, message: &SignalingMessage) {
        if self.role == Role::Initiator {
            tracing::warn!(session_id = %self.session_id, "Initiator received an offer, ignoring");
            return;
        }

        let description = match message.payload_as::<DescriptionPayload>() {
            Ok(payload) => payload.sdp,
            Err(e) => {
                return self.fail(ConnectionError::Negotiation(format!("malformed offer: {}", e)))
            }
        };

        match self.state {
            NegotiationState::Connecting | NegotiationState::Connected => {
                // A restart offer reuses the transport; anything else starts over
                if self.remote_description_set && !self.restart_in_flight {
                    if self.rebuild().await.is_err() {
                        return;
                    }
                }
            }
            NegotiationState::Disconnected => {
                if self.rebuild().await.is_err() {
                    return;
                }
            }
            other => {
                tracing::warn!(state = %other, "Offer received in unexpected state, ignoring");
                return;
            }
        }

        if !self.apply_remote_description(description).await {
            return;
        }

        let Some(transport) = self.media_transport.clone() else {
            return;
        };
        let answer = match transport.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return self.fail(ConnectionError::Negotiation(e.to_string())),
        };
        if let Err(e) = transport.set_local_description(answer.clone()).await {
            return self.fail(ConnectionError::Negotiation(e.to_string()));
        }

        match SignalingMessage::answer(&self.session_id, answer) {
            Ok(message) => self.signal.send(&message),
            Err(e) => return self.fail(ConnectionError::Negotiation(e.to_string())),
        }
        tracing::info!(session_id = %self.session_id, "Answer sent");
    }

    async fn on_answer(&mut self, message: &SignalingMessage) {
        if !self.awaiting_answer {
            tracing::warn!(session_id = %self.session_id, "Answer without an outstanding offer, ignoring");
            return;
        }

        let description = match message.payload_as::<DescriptionPayload>() {
            Ok(payload) => payload.sdp,
            Err(e) => {
                return self.fail(ConnectionError::Negotiation(format!("malformed answer: {}", e)))
            }
        };

        self.awaiting_answer = false;
        self.apply_remote_description(description).await;
    }

    /// Apply the peer's description and flush buffered candidates
    async fn apply_remote_description(&mut self, description: SessionDescription) -> bool {
        let Some(transport) = self.media_transport.clone() else {
            return false;
        };

        if let Err(e) = transport.set_remote_description(description).await {
            self.fail(ConnectionError::Negotiation(e.to_string()));
            return false;
        }
        self.remote_description_set = true;

        let pending = self.buffer.drain();
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "Flushing buffered candidates");
        }
        for candidate in pending {
            self.apply_candidate(&transport, candidate).await;
        }

        true
    }

    async fn on_remote_candidate(&mut self, message: &SignalingMessage) {
        let candidate = match message.payload_as::<CandidatePayload>() {
            Ok(payload) => payload.candidate,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed candidate, skipping");
                return;
            }
        };

        match self.media_transport.clone() {
            Some(transport) if self.remote_description_set => {
                self.apply_candidate(&transport, candidate).await
            }
            _ => {
                self.buffer.push(candidate);
                tracing::debug!(buffered = self.buffer.len(), "Candidate buffered");
            }
        }
    }

    async fn apply_candidate(&self, transport: &Arc<dyn MediaTransport>, candidate: IceCandidate) {
        if let Err(e) = transport.add_ice_candidate(candidate).await {
            tracing::warn!(error = %e, "Failed to apply candidate, continuing");
        }
    }

    async fn on_media_event(&mut self, event: MediaTransportEvent) {
        match event {
            MediaTransportEvent::LocalCandidate(candidate) => {
                match SignalingMessage::candidate(&self.session_id, candidate) {
                    Ok(message) => self.signal.send(&message),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode local candidate"),
                }
            }
            MediaTransportEvent::RemoteTrack(info) => {
                tracing::info!(session_id = %self.session_id, kind = %info.kind, track = %info.id, "Remote track arrived");
                self.observers.publish(ConnectionEvent::RemoteTrack(info));
                if self.state == NegotiationState::Connecting {
                    self.set_state(NegotiationState::Connected);
                }
            }
            MediaTransportEvent::IceConnectionState(ice) => {
                tracing::debug!(session_id = %self.session_id, state = %ice, "ICE connection state");
                match ice {
                    IceConnectionState::Failed => self.on_connectivity_failed().await,
                    IceConnectionState::Connected | IceConnectionState::Completed => {
                        self.restart_in_flight = false;
                    }
                    _ => {}
                }
            }
            MediaTransportEvent::ConnectionState(pc) => {
                tracing::debug!(session_id = %self.session_id, state = %pc, "Peer connection state");
                if pc == PeerConnectionState::Failed {
                    if self.restart_in_flight {
                        tracing::debug!("Connection failure covered by pending ICE restart");
                    } else {
                        self.fail(ConnectionError::ConnectionFailed);
                    }
                }
            }
        }
    }

    async fn on_connectivity_failed(&mut self) {
        if self.ice_restarted || !self.transport_connected {
            return self.fail(ConnectionError::ConnectivityFailed);
        }

        self.ice_restarted = true;
        self.restart_in_flight = true;
        tracing::warn!(session_id = %self.session_id, role = %self.role, "ICE failed, restarting");
        self.schedule_restart_deadline();

        match self.role {
            Role::Initiator => self.send_offer(true).await,
            Role::Responder => {
                if let Some(transport) = self.media_transport.clone() {
                    if let Err(e) = transport.restart_ice().await {
                        tracing::warn!(error = %e, "ICE restart request failed");
                    }
                }
            }
        }
    }

    /// Feed a [`NegotiatorEvent::RestartDeadline`] back into the loop once the
    /// restart window closes
    fn schedule_restart_deadline(&self) {
        let events = self.events.clone();
        let generation = self.generation;
        let timeout = self.ice_restart_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(NegotiatorEvent::RestartDeadline { generation });
        });
    }

    /// Replace the media transport with a fresh one for a new handshake
    async fn rebuild(&mut self) -> Result<(), ()> {
        tracing::info!(session_id = %self.session_id, "Rebuilding media transport");

        if let Some(old) = self.media_transport.take() {
            if let Err(e) = old.close().await {
                tracing::debug!(error = %e, "Error closing replaced media transport");
            }
        }

        self.buffer.clear();
        self.remote_description_set = false;
        self.awaiting_answer = false;
        self.ice_restarted = false;
        self.restart_in_flight = false;

        if let Err(e) = self.build_media_transport().await {
            self.fail(ConnectionError::Negotiation(e.to_string()));
            return Err(());
        }

        self.set_state(NegotiationState::Connecting);
        Ok(())
    }

    async fn build_media_transport(&mut self) -> Result<(), MediaTransportError> {
        self.generation += 1;
        let sink = MediaEventSink::new(self.generation, self.events.clone());
        let transport = self.factory.create(&self.ice_servers, sink).await?;

        if let Some(media) = &self.local_media {
            for track in media.tracks() {
                transport.add_local_track(track.clone()).await?;
            }
        }

        self.media_transport = Some(transport);
        tracing::debug!(generation = self.generation, "Media transport ready");
        Ok(())
    }

    /// Release media, close the media transport, end in `closed`
    async fn teardown(&mut self) {
        if let Some(media) = self.local_media.take() {
            media.stop_all();
        }

        if let Some(transport) = self.media_transport.take() {
            if let Err(e) = transport.close().await {
                tracing::debug!(error = %e, "Error closing media transport");
            }
        }

        self.buffer.clear();
        self.restart_in_flight = false;

        if self.state.is_active() {
            self.set_state(NegotiationState::Disconnected);
        }
        self.set_state(NegotiationState::Closed);
    }

    fn fail(&mut self, error: ConnectionError) {
        tracing::error!(session_id = %self.session_id, error = %error, "Connection attempt failed");
        self.observers.publish_error(error);
        self.restart_in_flight = false;
        if !matches!(self.state, NegotiationState::Closed | NegotiationState::Failed) {
            self.set_state(NegotiationState::Failed);
        }
    }

    fn set_state(&mut self, state: NegotiationState) {
        if self.state == state {
            return;
        }
        tracing::info!(
            session_id = %self.session_id,
            from = %self.state,
            to = %state,
            "Negotiation state changed"
        );
        self.state = state;
        self.observers.publish_state(state);
    }
}
