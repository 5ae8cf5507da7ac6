//! Configuration types for the negotiation client

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network relay (STUN/TURN) endpoint used for local candidate gathering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs (`stun:` / `turn:`)
    pub urls: Vec<String>,

    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// STUN server without credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// TURN server with credentials
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Reconnection schedule for the signaling transport
///
/// Retry *n* (1-indexed) waits `base_delay × n`. After `max_attempts`
/// retries the transport gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay unit
    pub base_delay: Duration,

    /// Automatic retries before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(2000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry `attempt`, or `None` once the cap is exceeded
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempt)
    }
}

/// Video capture constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    /// Preferred width
    pub ideal_width: u32,
    /// Preferred height
    pub ideal_height: u32,
    /// Minimum width
    pub min_width: u32,
    /// Minimum height
    pub min_height: u32,
    /// Maximum width
    pub max_width: u32,
    /// Maximum height
    pub max_height: u32,
    /// Preferred frame rate
    pub ideal_frame_rate: u32,
    /// Maximum frame rate
    pub max_frame_rate: u32,
    /// Camera facing mode
    pub facing_mode: String,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            min_width: 640,
            min_height: 480,
            max_width: 1920,
            max_height: 1080,
            ideal_frame_rate: 30,
            max_frame_rate: 60,
            facing_mode: "user".to_string(),
        }
    }
}

/// Audio capture constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    /// Echo cancellation
    pub echo_cancellation: bool,
    /// Noise suppression
    pub noise_suppression: bool,
    /// Automatic gain control
    pub auto_gain_control: bool,
    /// Sample rate (Hz)
    pub sample_rate: u32,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            sample_rate: 44_100,
        }
    }
}

/// What to ask the capture layer for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Video constraints, `None` for audio-only
    pub video: Option<VideoConstraints>,
    /// Audio constraints, `None` for video-only
    pub audio: Option<AudioConstraints>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: Some(VideoConstraints::default()),
            audio: Some(AudioConstraints::default()),
        }
    }
}

/// Configuration for a [`ConnectionController`](crate::ConnectionController)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Signaling relay WebSocket URL
    pub relay_url: String,

    /// Ordered ICE server list
    pub ice_servers: Vec<IceServer>,

    /// Transport reconnection schedule
    pub reconnect: ReconnectPolicy,

    /// Bound on a single connect attempt
    pub connect_timeout: Duration,

    /// Pause between teardown and re-initialize in `retry`
    pub retry_delay: Duration,

    /// How long `disconnect` waits for the negotiation loop to finish
    pub shutdown_timeout: Duration,

    /// How long an ICE restart may take before the attempt fails
    pub ice_restart_timeout: Duration,

    /// Capture constraints handed to the media source
    pub media: MediaConstraints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:3001/ws".to_string(),
            ice_servers: default_ice_servers(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(20),
            retry_delay: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
            ice_restart_timeout: Duration::from_secs(15),
            media: MediaConstraints::default(),
        }
    }
}

/// Public STUN servers used when nothing else is configured
pub fn default_ice_servers() -> Vec<IceServer> {
    vec![
        IceServer::stun("stun:stun.l.google.com:19302"),
        IceServer::stun("stun:stun1.l.google.com:19302"),
        IceServer::stun("stun:stun2.l.google.com:19302"),
        IceServer::stun("stun:stun.relay.metered.ca:80"),
    ]
}

impl ClientConfig {
    /// Config pointed at a specific relay, everything else default
    pub fn with_relay_url(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Default::default()
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("PEERLINK_RELAY_URL") {
            config.relay_url = url;
        }

        if let Ok(base_ms) = std::env::var("PEERLINK_RECONNECT_BASE_MS") {
            if let Ok(val) = base_ms.parse() {
                config.reconnect.base_delay = Duration::from_millis(val);
            }
        }

        if let Ok(max) = std::env::var("PEERLINK_RECONNECT_MAX_ATTEMPTS") {
            if let Ok(val) = max.parse() {
                config.reconnect.max_attempts = val;
            }
        }

        if let Ok(secs) = std::env::var("PEERLINK_CONNECT_TIMEOUT_SECS") {
            if let Ok(val) = secs.parse() {
                config.connect_timeout = Duration::from_secs(val);
            }
        }

        if let Ok(urls) = std::env::var("PEERLINK_STUN_SERVERS") {
            let servers: Vec<_> = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(IceServer::stun)
                .collect();
            if !servers.is_empty() {
                config.ice_servers = servers;
            }
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(format!(
                "relay_url must be a ws:// or wss:// URL, got '{}'",
                self.relay_url
            ));
        }

        if self.reconnect.base_delay.is_zero() {
            return Err("reconnect.base_delay must be > 0".to_string());
        }

        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be > 0".to_string());
        }

        if self.ice_restart_timeout.is_zero() {
            return Err("ice_restart_timeout must be > 0".to_string());
        }

        if self.ice_servers.iter().any(|s| s.urls.is_empty()) {
            return Err("every ICE server needs at least one URL".to_string());
        }

        if self.media.video.is_none() && self.media.audio.is_none() {
            return Err("media constraints must request audio or video".to_string());
        }

        Ok(())
    }
}
