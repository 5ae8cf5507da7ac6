//! Negotiation state machine driven event by event with mock media seams

use peerlink_client::{
    mock::{MockCall, MockMediaTransport, MockMediaTransportFactory, MockTrack, RecordingSignalSender},
    ConnectionError, ConnectionEvent, IceConnectionState, LocalMedia, LocalTrack, MediaError,
    MediaTransportEvent, NegotiationState, NegotiatorCommand, NegotiatorEvent, NegotiatorObservers,
    NegotiatorParams, PeerConnectionState, PeerNegotiator, RemoteTrackInfo, TrackKind,
    TransportEvent,
};
use peerlink_protocol::{
    IceCandidate, MessageKind, PeerInfo, Role, SdpType, SessionDescription, SignalingMessage,
};
use serde_json::json;
use std::{ops::ControlFlow, sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};

const SESSION: &str = "ABCDEFGH";
const RESTART_TIMEOUT: Duration = Duration::from_millis(100);

struct Harness {
    label: String,
    negotiator: PeerNegotiator,
    signal: Arc<RecordingSignalSender>,
    factory: Arc<MockMediaTransportFactory>,
    observers: NegotiatorObservers,
    loop_rx: mpsc::UnboundedReceiver<NegotiatorEvent>,
    _events: mpsc::UnboundedReceiver<ConnectionEvent>,
    tracks: Vec<Arc<MockTrack>>,
}

impl Harness {
    async fn new(label: &str, role: Role, auto: bool) -> Self {
        let signal = Arc::new(RecordingSignalSender::new());
        let factory = Arc::new(MockMediaTransportFactory::new(label, auto));
        let (observers, events) = NegotiatorObservers::new();
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();

        let mut negotiator = PeerNegotiator::new(NegotiatorParams {
            session_id: SESSION.to_string(),
            role,
            ice_servers: Vec::new(),
            ice_restart_timeout: RESTART_TIMEOUT,
            signal: signal.clone(),
            factory: factory.clone(),
            events: loop_tx,
            observers: observers.clone(),
        });
        negotiator.initialize().await.unwrap();

        let tracks = vec![
            Arc::new(MockTrack::new(&format!("{}-audio", label), TrackKind::Audio, label)),
            Arc::new(MockTrack::new(&format!("{}-video", label), TrackKind::Video, label)),
        ];

        Self {
            label: label.to_string(),
            negotiator,
            signal,
            factory,
            observers,
            loop_rx,
            _events: events,
            tracks,
        }
    }

    async fn handle(&mut self, event: NegotiatorEvent) -> ControlFlow<()> {
        self.negotiator.handle(event).await
    }

    /// Signaling up and media granted
    async fn ready(&mut self) {
        self.handle(NegotiatorEvent::Transport(TransportEvent::Connected))
            .await;
        let tracks: Vec<Arc<dyn LocalTrack>> = self
            .tracks
            .iter()
            .map(|t| t.clone() as Arc<dyn LocalTrack>)
            .collect();
        let media = LocalMedia::new(self.label.clone(), tracks);
        self.handle(NegotiatorEvent::MediaAcquired(Ok(media))).await;
        assert_eq!(self.negotiator.state(), NegotiationState::Connecting);
    }

    async fn signal(&mut self, message: SignalingMessage) {
        self.handle(NegotiatorEvent::Transport(TransportEvent::Message(message)))
            .await;
    }

    /// Apply everything the media transports reported so far
    async fn pump(&mut self) {
        while let Ok(event) = self.loop_rx.try_recv() {
            let _ = self.negotiator.handle(event).await;
        }
    }

    fn transport(&self) -> Arc<MockMediaTransport> {
        self.factory.latest().unwrap()
    }

    fn state(&self) -> NegotiationState {
        self.negotiator.state()
    }

    fn sent_kinds(&self) -> Vec<MessageKind> {
        self.signal.take_sent().into_iter().map(|m| m.kind).collect()
    }
}

fn responder_joined() -> SignalingMessage {
    SignalingMessage::peer_joined(
        SESSION,
        PeerInfo {
            role: Role::Responder,
            handle: "p-2".to_string(),
        },
    )
    .unwrap()
}

fn offer(sdp: &str) -> SignalingMessage {
    SignalingMessage::offer(SESSION, SessionDescription::new(SdpType::Offer, sdp)).unwrap()
}

fn answer(sdp: &str) -> SignalingMessage {
    SignalingMessage::answer(SESSION, SessionDescription::new(SdpType::Answer, sdp)).unwrap()
}

fn candidate(line: &str) -> SignalingMessage {
    SignalingMessage::candidate(SESSION, IceCandidate::new(line)).unwrap()
}

fn remote_track() -> MediaTransportEvent {
    MediaTransportEvent::RemoteTrack(RemoteTrackInfo {
        id: "remote-video".to_string(),
        kind: TrackKind::Video,
        stream_id: "remote".to_string(),
    })
}

/// Initiator that has offered and applied an answer
async fn connected_initiator() -> Harness {
    let mut a = Harness::new("a", Role::Initiator, false).await;
    a.ready().await;
    a.signal(responder_joined()).await;
    a.signal(answer("v=0\r\ns=b\r\n")).await;
    a.transport().emit(remote_track());
    a.pump().await;
    assert_eq!(a.state(), NegotiationState::Connected);
    a.signal.take_sent();
    a
}

#[tokio::test]
async fn test_responder_flushes_buffered_candidates_in_order() {
    let mut b = Harness::new("b", Role::Responder, false).await;
    b.ready().await;
    assert_eq!(b.signal.joins(), vec![(SESSION.to_string(), Role::Responder)]);

    b.signal(candidate("candidate:1")).await;
    b.signal(candidate("candidate:2")).await;
    assert_eq!(b.negotiator.buffered_candidates(), 2);

    b.signal(offer("v=0\r\ns=a\r\n")).await;

    assert_eq!(b.negotiator.buffered_candidates(), 0);
    assert_eq!(
        b.transport().calls(),
        vec![
            MockCall::AddTrack("b-audio".to_string()),
            MockCall::AddTrack("b-video".to_string()),
            MockCall::SetRemote(SdpType::Offer),
            MockCall::AddCandidate("candidate:1".to_string()),
            MockCall::AddCandidate("candidate:2".to_string()),
            MockCall::CreateAnswer,
            MockCall::SetLocal(SdpType::Answer),
        ]
    );
    assert_eq!(b.sent_kinds(), vec![MessageKind::Answer]);

    b.transport().emit(remote_track());
    b.pump().await;
    assert_eq!(b.state(), NegotiationState::Connected);
}

#[tokio::test]
async fn test_buffered_and_direct_candidates_end_the_same() {
    let mut early = Harness::new("early", Role::Responder, false).await;
    let mut late = Harness::new("late", Role::Responder, false).await;
    early.ready().await;
    late.ready().await;

    let lines = ["candidate:1", "candidate:2", "candidate:3"];

    for line in lines {
        early.signal(candidate(line)).await;
    }
    early.signal(offer("v=0")).await;

    late.signal(offer("v=0")).await;
    for line in lines {
        late.signal(candidate(line)).await;
    }

    assert_eq!(
        early.transport().applied_candidates(),
        late.transport().applied_candidates()
    );
    assert_eq!(early.transport().applied_candidates(), lines.to_vec());
    assert_eq!(early.state(), late.state());
    assert_eq!(early.negotiator.buffered_candidates(), 0);
    assert_eq!(late.negotiator.buffered_candidates(), 0);
}

#[tokio::test]
async fn test_two_negotiators_reach_connected() {
    let mut a = Harness::new("a", Role::Initiator, true).await;
    let mut b = Harness::new("b", Role::Responder, true).await;
    a.ready().await;
    b.ready().await;

    // What the relay would say
    a.signal(SignalingMessage::joined(SESSION, 1, Vec::new()).unwrap())
        .await;
    b.signal(
        SignalingMessage::joined(
            SESSION,
            2,
            vec![PeerInfo {
                role: Role::Initiator,
                handle: "p-1".to_string(),
            }],
        )
        .unwrap(),
    )
    .await;
    a.signal(responder_joined()).await;

    for _ in 0..8 {
        a.pump().await;
        b.pump().await;
        for message in a.signal.take_sent() {
            b.signal(message).await;
        }
        for message in b.signal.take_sent() {
            a.signal(message).await;
        }
    }

    assert_eq!(a.state(), NegotiationState::Connected);
    assert_eq!(b.state(), NegotiationState::Connected);
    assert!(a.observers.last_error().is_none());
    assert!(b.observers.last_error().is_none());

    // Each side applied the other's candidate
    assert_eq!(a.transport().applied_candidates().len(), 1);
    assert_eq!(b.transport().applied_candidates().len(), 1);
}

#[tokio::test]
async fn test_peer_left_disconnects_without_failing() {
    let mut a = connected_initiator().await;

    a.signal(SignalingMessage::peer_left(SESSION, "p-2", Role::Responder).unwrap())
        .await;

    assert_eq!(a.state(), NegotiationState::Disconnected);
    assert!(a.observers.last_error().is_none());
}

#[tokio::test]
async fn test_peer_rejoin_rebuilds_and_discards_stale_events() {
    let mut a = connected_initiator().await;
    let old = a.transport();

    a.signal(SignalingMessage::peer_left(SESSION, "p-2", Role::Responder).unwrap())
        .await;
    a.signal(responder_joined()).await;

    let new = a.transport();
    assert!(old.is_closed());
    assert_eq!(new.generation(), old.generation() + 1);
    assert_eq!(a.negotiator.generation(), new.generation());
    assert_eq!(
        new.calls(),
        vec![
            MockCall::AddTrack("a-audio".to_string()),
            MockCall::AddTrack("a-video".to_string()),
            MockCall::CreateOffer { ice_restart: false },
            MockCall::SetLocal(SdpType::Offer),
        ]
    );
    assert_eq!(a.sent_kinds(), vec![MessageKind::Offer]);
    assert_eq!(a.state(), NegotiationState::Connecting);

    // The replaced transport is ignored
    old.emit(remote_track());
    old.emit(MediaTransportEvent::IceConnectionState(IceConnectionState::Failed));
    a.pump().await;
    assert_eq!(a.state(), NegotiationState::Connecting);
    assert!(a.signal.take_sent().is_empty());
}

#[tokio::test]
async fn test_denied_media_stays_initializing() {
    let mut b = Harness::new("b", Role::Responder, false).await;

    b.handle(NegotiatorEvent::Transport(TransportEvent::Connected))
        .await;
    b.handle(NegotiatorEvent::MediaAcquired(Err(MediaError::PermissionDenied)))
        .await;

    assert_eq!(b.state(), NegotiationState::Initializing);
    assert_eq!(
        b.observers.last_error(),
        Some(ConnectionError::MediaPermissionDenied)
    );
    assert!(b.signal.joins().is_empty());

    // Distinct from a transport failure
    let message = b.observers.last_error().unwrap().to_string();
    assert!(message.starts_with("Camera/microphone access denied."));
}

#[tokio::test]
async fn test_ice_failure_restarts_once_then_fails() {
    let mut a = connected_initiator().await;
    let transport = a.transport();

    transport.emit(MediaTransportEvent::IceConnectionState(IceConnectionState::Failed));
    // Covered by the restart in flight
    transport.emit(MediaTransportEvent::ConnectionState(PeerConnectionState::Failed));
    a.pump().await;

    assert!(transport
        .calls()
        .contains(&MockCall::CreateOffer { ice_restart: true }));
    assert_eq!(a.sent_kinds(), vec![MessageKind::Offer]);
    assert_eq!(a.state(), NegotiationState::Connected);

    transport.emit(MediaTransportEvent::IceConnectionState(IceConnectionState::Failed));
    a.pump().await;

    assert_eq!(a.state(), NegotiationState::Failed);
    assert_eq!(
        a.observers.last_error(),
        Some(ConnectionError::ConnectivityFailed)
    );
}

#[tokio::test]
async fn test_responder_restarts_in_place() {
    let mut b = Harness::new("b", Role::Responder, false).await;
    b.ready().await;
    b.signal(offer("v=0")).await;
    let transport = b.transport();

    transport.emit(MediaTransportEvent::IceConnectionState(IceConnectionState::Failed));
    b.pump().await;
    assert!(transport.calls().contains(&MockCall::RestartIce));

    // The restart offer reuses the transport
    b.signal.take_sent();
    b.signal(offer("v=0\r\ns=restart\r\n")).await;
    assert_eq!(b.negotiator.generation(), transport.generation());
    assert_eq!(b.sent_kinds(), vec![MessageKind::Answer]);

    transport.emit(MediaTransportEvent::IceConnectionState(IceConnectionState::Connected));
    transport.emit(MediaTransportEvent::ConnectionState(PeerConnectionState::Failed));
    b.pump().await;
    assert_eq!(b.state(), NegotiationState::Failed);
    assert_eq!(b.observers.last_error(), Some(ConnectionError::ConnectionFailed));
}

#[tokio::test]
async fn test_responder_restart_without_offer_times_out() {
    let mut b = Harness::new("b", Role::Responder, false).await;
    b.ready().await;
    b.signal(offer("v=0")).await;
    let transport = b.transport();
    transport.emit(remote_track());
    b.pump().await;
    assert_eq!(b.state(), NegotiationState::Connected);

    transport.emit(MediaTransportEvent::IceConnectionState(IceConnectionState::Failed));
    transport.emit(MediaTransportEvent::ConnectionState(PeerConnectionState::Failed));
    b.pump().await;
    assert!(transport.calls().contains(&MockCall::RestartIce));
    assert_eq!(b.state(), NegotiationState::Connected);

    // The initiator never sends its restart offer
    tokio::time::sleep(RESTART_TIMEOUT * 2).await;
    b.pump().await;

    assert_eq!(b.state(), NegotiationState::Failed);
    assert_eq!(b.observers.last_error(), Some(ConnectionError::ConnectionFailed));
}

#[tokio::test]
async fn test_recovered_restart_outlives_deadline() {
    let mut a = connected_initiator().await;
    let transport = a.transport();

    transport.emit(MediaTransportEvent::IceConnectionState(IceConnectionState::Failed));
    a.pump().await;
    transport.emit(MediaTransportEvent::IceConnectionState(IceConnectionState::Connected));
    a.pump().await;

    tokio::time::sleep(RESTART_TIMEOUT * 2).await;
    a.pump().await;

    assert_eq!(a.state(), NegotiationState::Connected);
    assert!(a.observers.last_error().is_none());
}

#[tokio::test]
async fn test_unexpected_answer_is_ignored() {
    let mut a = Harness::new("a", Role::Initiator, false).await;
    a.ready().await;

    a.signal(answer("v=0")).await;

    assert_eq!(a.state(), NegotiationState::Connecting);
    assert!(!a
        .transport()
        .calls()
        .iter()
        .any(|c| matches!(c, MockCall::SetRemote(_))));
    assert!(a.observers.last_error().is_none());
}

#[tokio::test]
async fn test_malformed_offer_fails_attempt() {
    let mut b = Harness::new("b", Role::Responder, false).await;
    b.ready().await;

    let bogus = SignalingMessage::new(SESSION, MessageKind::Offer, &json!({"bogus": true})).unwrap();
    b.signal(bogus).await;

    assert_eq!(b.state(), NegotiationState::Failed);
    assert!(matches!(
        b.observers.last_error(),
        Some(ConnectionError::Negotiation(_))
    ));
}

#[tokio::test]
async fn test_unparseable_sdp_fails_attempt() {
    let mut b = Harness::new("b", Role::Responder, false).await;
    b.ready().await;

    b.signal(offer("invalid")).await;

    assert_eq!(b.state(), NegotiationState::Failed);
    assert!(b.sent_kinds().is_empty());
}

#[tokio::test]
async fn test_relay_error_does_not_change_state() {
    let mut a = Harness::new("a", Role::Initiator, false).await;
    a.ready().await;

    a.signal(SignalingMessage::error(SESSION, "session ABCDEFGH is full").unwrap())
        .await;

    assert_eq!(a.state(), NegotiationState::Connecting);
    assert_eq!(
        a.observers.last_error(),
        Some(ConnectionError::Signaling("session ABCDEFGH is full".to_string()))
    );
}

#[tokio::test]
async fn test_transport_exhaustion_fails_attempt() {
    let mut a = Harness::new("a", Role::Initiator, false).await;

    a.handle(NegotiatorEvent::Transport(TransportEvent::Exhausted { attempts: 5 }))
        .await;

    assert_eq!(a.state(), NegotiationState::Failed);
    assert_eq!(
        a.observers.last_error(),
        Some(ConnectionError::TransportExhausted { attempts: 5 })
    );
}

#[tokio::test]
async fn test_frames_for_other_sessions_are_ignored() {
    let mut b = Harness::new("b", Role::Responder, false).await;
    b.ready().await;

    b.signal(SignalingMessage::candidate("OTHER", IceCandidate::new("candidate:9")).unwrap())
        .await;

    assert_eq!(b.negotiator.buffered_candidates(), 0);
}

#[tokio::test]
async fn test_toggle_and_shutdown() {
    let mut a = connected_initiator().await;

    let (reply, enabled) = oneshot::channel();
    a.handle(NegotiatorEvent::Command(NegotiatorCommand::ToggleTrack {
        kind: TrackKind::Audio,
        reply,
    }))
    .await;
    assert!(!enabled.await.unwrap());

    let (reply, done) = oneshot::channel();
    let flow = a
        .handle(NegotiatorEvent::Command(NegotiatorCommand::Shutdown { reply }))
        .await;
    assert!(flow.is_break());
    done.await.unwrap();

    assert_eq!(a.state(), NegotiationState::Closed);
    assert!(a.transport().is_closed());
    assert!(a.tracks.iter().all(|t| t.stop_count() == 1));
}
