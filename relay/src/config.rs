//! Configuration types for the signaling relay

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the relay server
///
/// Defines the listening address, per-session limits and frame limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Interface to bind
    pub host: String,

    /// Port to bind (0 picks an ephemeral port)
    pub port: u16,

    /// Maximum participants admitted to one session
    pub max_participants_per_session: usize,

    /// Maximum session id length (bytes)
    pub max_session_id_len: usize,

    /// Maximum size of a single signaling frame (bytes)
    pub max_message_size: usize,

    /// Allowed CORS origins for the HTTP endpoints (`*` allows all)
    pub cors_origins: Vec<String>,

    /// How often each socket is pinged (milliseconds)
    pub ping_interval_ms: u64,

    /// Silence after which a socket is treated as dead (milliseconds)
    pub idle_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            max_participants_per_session: 2,
            max_session_id_len: 128,
            max_message_size: 64 * 1024, // 64 KiB
            cors_origins: vec!["*".to_string()],
            ping_interval_ms: 15_000,
            idle_timeout_ms: 45_000,
        }
    }
}

impl RelayConfig {
    /// Config bound to localhost on an ephemeral port
    pub fn local_ephemeral() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        }
    }

    /// `host:port` string for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Ping cadence for signaling sockets
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Longest a socket may stay silent before it is dropped
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host must not be empty".to_string());
        }

        if self.max_participants_per_session < 2 {
            return Err("max_participants_per_session must be >= 2".to_string());
        }

        if self.max_session_id_len == 0 {
            return Err("max_session_id_len must be > 0".to_string());
        }

        if self.max_message_size == 0 {
            return Err("max_message_size must be > 0".to_string());
        }

        if self.ping_interval_ms == 0 {
            return Err("ping_interval_ms must be > 0".to_string());
        }

        if self.idle_timeout_ms <= self.ping_interval_ms {
            return Err("idle_timeout_ms must be greater than ping_interval_ms".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 3001);
        assert_eq!(config.max_participants_per_session, 2);
        assert_eq!(config.bind_addr(), "0.0.0.0:3001");
    }

    #[test]
    fn test_validate_rejects_single_participant_sessions() {
        let config = RelayConfig {
            max_participants_per_session: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_idle_timeout_below_ping_interval() {
        let config = RelayConfig {
            ping_interval_ms: 1_000,
            idle_timeout_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: RelayConfig = serde_json::from_str(r#"{"port": 4000}"#).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.host, "0.0.0.0");
    }
}
