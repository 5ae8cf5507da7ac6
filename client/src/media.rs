//! Local media seams
//!
//! Capture lives outside this crate. A [`MediaSource`] hands the controller a
//! [`LocalMedia`] bundle of [`LocalTrack`] handles; the controller only ever
//! enables, disables and stops them.

use crate::{config::MediaConstraints, error::MediaError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Microphone
    Audio,
    /// Camera
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Handle to a captured track
pub trait LocalTrack: Send + Sync {
    /// Track id, unique within its stream
    fn id(&self) -> &str;

    /// Audio or video
    fn kind(&self) -> TrackKind;

    /// Stream the track belongs to
    fn stream_id(&self) -> &str;

    /// Whether the track currently produces media
    fn is_enabled(&self) -> bool;

    /// Mute or unmute without renegotiation
    fn set_enabled(&self, enabled: bool);

    /// Release the capture device
    fn stop(&self);
}

/// Snapshot of a local track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Track id
    pub id: String,
    /// Audio or video
    pub kind: TrackKind,
    /// Enabled flag at snapshot time
    pub enabled: bool,
}

/// Snapshot of the local stream, published when media is acquired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMediaInfo {
    /// Stream id
    pub stream_id: String,
    /// Tracks in the stream
    pub tracks: Vec<TrackInfo>,
}

/// Remote track surfaced by the media transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrackInfo {
    /// Track id
    pub id: String,
    /// Audio or video
    pub kind: TrackKind,
    /// Remote stream id
    pub stream_id: String,
}

/// Acquired local stream
pub struct LocalMedia {
    stream_id: String,
    tracks: Vec<Arc<dyn LocalTrack>>,
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("stream_id", &self.stream_id)
            .field(
                "tracks",
                &self.tracks.iter().map(|t| t.id().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl LocalMedia {
    /// Bundle tracks into a stream
    pub fn new(stream_id: impl Into<String>, tracks: Vec<Arc<dyn LocalTrack>>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks,
        }
    }

    /// Stream id
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// All tracks
    pub fn tracks(&self) -> &[Arc<dyn LocalTrack>] {
        &self.tracks
    }

    /// First track of a kind
    pub fn track(&self, kind: TrackKind) -> Option<&Arc<dyn LocalTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Flip the enabled flag of the first track of `kind`
    ///
    /// Returns the new flag, or `false` when there is no such track.
    pub fn toggle(&self, kind: TrackKind) -> bool {
        match self.track(kind) {
            Some(track) => {
                let enabled = !track.is_enabled();
                track.set_enabled(enabled);
                enabled
            }
            None => false,
        }
    }

    /// Stop every track, consuming the bundle
    pub fn stop_all(self) {
        for track in &self.tracks {
            track.stop();
        }
        tracing::debug!(stream_id = %self.stream_id, tracks = self.tracks.len(), "Local media released");
    }

    /// Snapshot for observers
    pub fn info(&self) -> LocalMediaInfo {
        LocalMediaInfo {
            stream_id: self.stream_id.clone(),
            tracks: self
                .tracks
                .iter()
                .map(|t| TrackInfo {
                    id: t.id().to_string(),
                    kind: t.kind(),
                    enabled: t.is_enabled(),
                })
                .collect(),
        }
    }
}

/// Capture layer
///
/// `acquire` may wait indefinitely for a permission prompt. Failures are not
/// retried by the controller.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Open capture devices matching `constraints`
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError>;
}
