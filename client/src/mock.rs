//! In-memory doubles for the media and signaling seams
//!
//! Compiled for unit tests and behind the `test-helpers` feature.

use crate::{
    config::{IceServer, MediaConstraints},
    error::{MediaError, MediaTransportError, MediaTransportResult},
    media::{LocalMedia, LocalTrack, MediaSource, RemoteTrackInfo, TrackKind},
    media_transport::{MediaEventSink, MediaTransport, MediaTransportEvent, MediaTransportFactory},
    transport::SignalSender,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use peerlink_protocol::{IceCandidate, Role, SdpType, SessionDescription, SignalingMessage};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

/// Track that records how often it was stopped
#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: TrackKind,
    stream_id: String,
    enabled: AtomicBool,
    stops: AtomicUsize,
}

impl MockTrack {
    /// Enabled track
    pub fn new(id: &str, kind: TrackKind, stream_id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            stream_id: stream_id.to_string(),
            enabled: AtomicBool::new(true),
            stops: AtomicUsize::new(0),
        }
    }

    /// Number of `stop` calls
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl LocalTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stream_id(&self) -> &str {
        &self.stream_id
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// How a [`MockMediaSource`] answers `acquire`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMediaBehavior {
    /// Hand out an audio and a video track
    Grant,
    /// Permission refused
    Deny,
    /// No devices
    NoDevice,
}

/// Media source with scripted behaviour
#[derive(Debug)]
pub struct MockMediaSource {
    behavior: MockMediaBehavior,
    label: String,
    acquired: Mutex<Vec<Arc<MockTrack>>>,
}

impl MockMediaSource {
    /// Source whose tracks are named after `label`
    pub fn new(label: &str, behavior: MockMediaBehavior) -> Self {
        Self {
            behavior,
            label: label.to_string(),
            acquired: Mutex::new(Vec::new()),
        }
    }

    /// Every track handed out so far
    pub fn tracks(&self) -> Vec<Arc<MockTrack>> {
        self.acquired.lock().clone()
    }
}

#[async_trait]
impl MediaSource for MockMediaSource {
    async fn acquire(&self, _constraints: &MediaConstraints) -> Result<LocalMedia, MediaError> {
        match self.behavior {
            MockMediaBehavior::Deny => Err(MediaError::PermissionDenied),
            MockMediaBehavior::NoDevice => Err(MediaError::DeviceNotFound),
            MockMediaBehavior::Grant => {
                let stream_id = format!("{}-stream", self.label);
                let audio = Arc::new(MockTrack::new(
                    &format!("{}-audio", self.label),
                    TrackKind::Audio,
                    &stream_id,
                ));
                let video = Arc::new(MockTrack::new(
                    &format!("{}-video", self.label),
                    TrackKind::Video,
                    &stream_id,
                ));
                self.acquired.lock().extend([audio.clone(), video.clone()]);

                Ok(LocalMedia::new(stream_id, vec![audio, video]))
            }
        }
    }
}

/// Call recorded by a [`MockMediaTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `add_local_track(id)`
    AddTrack(String),
    /// `create_offer`
    CreateOffer {
        /// Restart flag
        ice_restart: bool,
    },
    /// `create_answer`
    CreateAnswer,
    /// `set_local_description`
    SetLocal(SdpType),
    /// `set_remote_description`
    SetRemote(SdpType),
    /// `add_ice_candidate(candidate line)`
    AddCandidate(String),
    /// `restart_ice`
    RestartIce,
    /// `close`
    Close,
}

/// Media transport that records calls
///
/// In auto mode it behaves like a cooperative peer: it gathers one local
/// candidate after each local description and reports a remote track after
/// each remote description. A remote description whose SDP is `"invalid"` is
/// rejected.
pub struct MockMediaTransport {
    label: String,
    sink: MediaEventSink,
    auto: bool,
    calls: Mutex<Vec<MockCall>>,
    closed: AtomicBool,
    descriptions: AtomicUsize,
}

impl MockMediaTransport {
    /// Transport reporting into `sink`
    pub fn new(label: &str, sink: MediaEventSink, auto: bool) -> Self {
        Self {
            label: label.to_string(),
            sink,
            auto,
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            descriptions: AtomicUsize::new(0),
        }
    }

    /// Calls so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Candidate lines applied so far, in order
    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                MockCall::AddCandidate(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Generation this transport reports with
    pub fn generation(&self) -> u64 {
        self.sink.generation()
    }

    /// Inject an event as if the engine produced it
    pub fn emit(&self, event: MediaTransportEvent) {
        self.sink.emit(event);
    }

    fn record(&self, call: MockCall) -> MediaTransportResult<()> {
        if self.closed.load(Ordering::SeqCst) && call != MockCall::Close {
            return Err(MediaTransportError::Closed);
        }
        self.calls.lock().push(call);
        Ok(())
    }

    fn description(&self, sdp_type: SdpType) -> SessionDescription {
        let n = self.descriptions.fetch_add(1, Ordering::SeqCst);
        SessionDescription::new(sdp_type, format!("v=0\r\ns={}-{}\r\n", self.label, n))
    }
}

#[async_trait]
impl MediaTransport for MockMediaTransport {
    async fn add_local_track(&self, track: Arc<dyn LocalTrack>) -> MediaTransportResult<()> {
        self.record(MockCall::AddTrack(track.id().to_string()))
    }

    async fn create_offer(&self, ice_restart: bool) -> MediaTransportResult<SessionDescription> {
        self.record(MockCall::CreateOffer { ice_restart })?;
        Ok(self.description(SdpType::Offer))
    }

    async fn create_answer(&self) -> MediaTransportResult<SessionDescription> {
        self.record(MockCall::CreateAnswer)?;
        Ok(self.description(SdpType::Answer))
    }

    async fn set_local_description(&self, description: SessionDescription) -> MediaTransportResult<()> {
        self.record(MockCall::SetLocal(description.sdp_type))?;
        if self.auto {
            self.sink.emit(MediaTransportEvent::LocalCandidate(IceCandidate::new(format!(
                "candidate:{}-{:?}",
                self.label, description.sdp_type
            ))));
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> MediaTransportResult<()> {
        if description.sdp == "invalid" {
            return Err(MediaTransportError::InvalidDescription("unparseable SDP".to_string()));
        }
        self.record(MockCall::SetRemote(description.sdp_type))?;
        if self.auto {
            self.sink.emit(MediaTransportEvent::RemoteTrack(RemoteTrackInfo {
                id: "remote-video".to_string(),
                kind: TrackKind::Video,
                stream_id: "remote".to_string(),
            }));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> MediaTransportResult<()> {
        self.record(MockCall::AddCandidate(candidate.candidate))
    }

    async fn restart_ice(&self) -> MediaTransportResult<()> {
        self.record(MockCall::RestartIce)
    }

    async fn close(&self) -> MediaTransportResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.calls.lock().push(MockCall::Close);
        }
        Ok(())
    }
}

/// Factory that keeps every transport it built
pub struct MockMediaTransportFactory {
    label: String,
    auto: bool,
    created: Mutex<Vec<Arc<MockMediaTransport>>>,
}

impl MockMediaTransportFactory {
    /// Factory producing transports in the given mode
    pub fn new(label: &str, auto: bool) -> Self {
        Self {
            label: label.to_string(),
            auto,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Every transport built so far
    pub fn created(&self) -> Vec<Arc<MockMediaTransport>> {
        self.created.lock().clone()
    }

    /// Most recently built transport
    pub fn latest(&self) -> Option<Arc<MockMediaTransport>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl MediaTransportFactory for MockMediaTransportFactory {
    async fn create(
        &self,
        _ice_servers: &[IceServer],
        sink: MediaEventSink,
    ) -> MediaTransportResult<Arc<dyn MediaTransport>> {
        let transport = Arc::new(MockMediaTransport::new(&self.label, sink, self.auto));
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

/// Signal sender that keeps everything it was asked to send
#[derive(Debug, Default)]
pub struct RecordingSignalSender {
    sent: Mutex<Vec<SignalingMessage>>,
    joins: Mutex<Vec<(String, Role)>>,
}

impl RecordingSignalSender {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything sent so far
    pub fn take_sent(&self) -> Vec<SignalingMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Join intents recorded so far
    pub fn joins(&self) -> Vec<(String, Role)> {
        self.joins.lock().clone()
    }
}

impl SignalSender for RecordingSignalSender {
    fn send(&self, message: &SignalingMessage) {
        self.sent.lock().push(message.clone());
    }

    fn join(&self, session_id: &str, role: Role) {
        self.joins.lock().push((session_id.to_string(), role));
    }
}
