//! Media transport over the `webrtc` crate
//!
//! Each [`RtcMediaTransport`] wraps one `RTCPeerConnection`. Local tracks are
//! published as `TrackLocalStaticSample`s; the capture pipeline looks them up
//! through [`RtcMediaTransportFactory::sample_track`] and writes encoded
//! samples into them.

use crate::{
    config::IceServer,
    error::{MediaTransportError, MediaTransportResult},
    media::{LocalTrack, RemoteTrackInfo, TrackKind},
    media_transport::{
        IceConnectionState, MediaEventSink, MediaTransport, MediaTransportEvent,
        MediaTransportFactory, PeerConnectionState,
    },
};
use async_trait::async_trait;
use parking_lot::Mutex;
use peerlink_protocol::{IceCandidate, SdpType, SessionDescription};
use std::{collections::HashMap, sync::Arc};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors,
        media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8},
        APIBuilder,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_connection_state::RTCIceConnectionState,
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration,
        offer_answer_options::RTCOfferOptions,
        peer_connection_state::RTCPeerConnectionState,
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
        RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::{RTCRtpCodecCapability, RTPCodecType},
        rtp_receiver::RTCRtpReceiver,
        RTCRtpTransceiver,
    },
    track::{
        track_local::{track_local_static_sample::TrackLocalStaticSample, TrackLocal},
        track_remote::TrackRemote,
    },
};

type SampleTracks = Arc<Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>>;

/// Builds [`RtcMediaTransport`]s and tracks their sample outputs
#[derive(Default)]
pub struct RtcMediaTransportFactory {
    sample_tracks: SampleTracks,
}

impl RtcMediaTransportFactory {
    /// Create a factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample sink for a local track on the current transport
    pub fn sample_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.sample_tracks.lock().get(track_id).cloned()
    }
}

#[async_trait]
impl MediaTransportFactory for RtcMediaTransportFactory {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        sink: MediaEventSink,
    ) -> MediaTransportResult<Arc<dyn MediaTransport>> {
        let transport =
            RtcMediaTransport::new(ice_servers, sink, self.sample_tracks.clone()).await?;
        Ok(Arc::new(transport))
    }
}

/// Media transport backed by an `RTCPeerConnection`
pub struct RtcMediaTransport {
    peer_connection: Arc<RTCPeerConnection>,
    sample_tracks: SampleTracks,
    /// Sample tracks this transport registered in `sample_tracks`
    attached: Mutex<Vec<(String, Arc<TrackLocalStaticSample>)>>,
    generation: u64,
}

impl RtcMediaTransport {
    /// Create a peer connection and wire its callbacks into `sink`
    pub async fn new(
        ice_servers: &[IceServer],
        sink: MediaEventSink,
        sample_tracks: SampleTracks,
    ) -> MediaTransportResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| {
            MediaTransportError::Internal(format!("Failed to register codecs: {}", e))
        })?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| {
                MediaTransportError::Internal(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let peer_connection = api.new_peer_connection(rtc_config).await.map_err(|e| {
            MediaTransportError::Internal(format!("Failed to create peer connection: {}", e))
        })?;
        let peer_connection = Arc::new(peer_connection);
        let generation = sink.generation();

        let candidate_sink = sink.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = candidate_sink.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => sink.emit(MediaTransportEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    })),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize local candidate"),
                }
            })
        }));

        let ice_sink = sink.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                ice_sink.emit(MediaTransportEvent::IceConnectionState(ice_state(state)));
                Box::pin(async {})
            },
        ));

        let pc_sink = sink.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                pc_sink.emit(MediaTransportEvent::ConnectionState(peer_state(state)));
                Box::pin(async {})
            },
        ));

        let track_sink = sink;
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                track_sink.emit(MediaTransportEvent::RemoteTrack(RemoteTrackInfo {
                    id: track.id(),
                    kind,
                    stream_id: track.stream_id(),
                }));
                Box::pin(async {})
            },
        ));

        tracing::debug!(generation, "Peer connection created");

        Ok(Self {
            peer_connection,
            sample_tracks,
            attached: Mutex::new(Vec::new()),
            generation,
        })
    }

    /// Current overall connection state
    pub fn connection_state(&self) -> PeerConnectionState {
        peer_state(self.peer_connection.connection_state())
    }
}

#[async_trait]
impl MediaTransport for RtcMediaTransport {
    async fn add_local_track(&self, track: Arc<dyn LocalTrack>) -> MediaTransportResult<()> {
        let mime_type = match track.kind() {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };

        let sample_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_owned(),
            track.stream_id().to_owned(),
        ));

        let sender = self
            .peer_connection
            .add_track(sample_track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| MediaTransportError::Internal(format!("Failed to add track: {}", e)))?;

        // RTCP has to be read for the interceptors to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        self.sample_tracks
            .lock()
            .insert(track.id().to_owned(), sample_track.clone());
        self.attached
            .lock()
            .push((track.id().to_owned(), sample_track));

        tracing::debug!(generation = self.generation, track = %track.id(), kind = %track.kind(), "Local track attached");
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> MediaTransportResult<SessionDescription> {
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self
            .peer_connection
            .create_offer(Some(options))
            .await
            .map_err(|e| MediaTransportError::Internal(format!("Failed to create offer: {}", e)))?;

        to_description(offer)
    }

    async fn create_answer(&self) -> MediaTransportResult<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| MediaTransportError::Internal(format!("Failed to create answer: {}", e)))?;

        to_description(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> MediaTransportResult<()> {
        let description = from_description(description)?;
        self.peer_connection
            .set_local_description(description)
            .await
            .map_err(|e| {
                MediaTransportError::InvalidDescription(format!("Failed to set local description: {}", e))
            })
    }

    async fn set_remote_description(&self, description: SessionDescription) -> MediaTransportResult<()> {
        let description = from_description(description)?;
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| {
                MediaTransportError::InvalidDescription(format!("Failed to set remote description: {}", e))
            })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> MediaTransportResult<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| MediaTransportError::InvalidCandidate(e.to_string()))
    }

    async fn restart_ice(&self) -> MediaTransportResult<()> {
        // Fresh credentials arrive with the initiator's restart offer
        tracing::debug!(generation = self.generation, "Waiting for ICE restart offer");
        Ok(())
    }

    async fn close(&self) -> MediaTransportResult<()> {
        {
            let mut sample_tracks = self.sample_tracks.lock();
            for (id, track) in self.attached.lock().drain(..) {
                // A newer transport may have registered the same track id
                if sample_tracks.get(&id).is_some_and(|t| Arc::ptr_eq(t, &track)) {
                    sample_tracks.remove(&id);
                }
            }
        }

        self.peer_connection.close().await.map_err(|e| {
            MediaTransportError::Internal(format!("Failed to close peer connection: {}", e))
        })
    }
}

fn to_description(description: RTCSessionDescription) -> MediaTransportResult<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(MediaTransportError::InvalidDescription(
                "unspecified description type".to_string(),
            ))
        }
    };
    Ok(SessionDescription::new(sdp_type, description.sdp))
}

fn from_description(description: SessionDescription) -> MediaTransportResult<RTCSessionDescription> {
    let parsed = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            return Ok(rollback);
        }
    };
    parsed.map_err(|e| MediaTransportError::InvalidDescription(e.to_string()))
}

fn ice_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::New,
    }
}

fn peer_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::New,
    }
}
