//! Peerlink relay launcher
//!
//! Configuration loading for the `peerlink-server` binary. The binary itself
//! only initializes logging and hands the merged [`RelayConfig`] to
//! [`peerlink_relay::RelayServer`].
//!
//! [`RelayConfig`]: peerlink_relay::RelayConfig

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;

pub use config::{CliArgs, LogFormat, LoggingConfig, ServerConfig};
