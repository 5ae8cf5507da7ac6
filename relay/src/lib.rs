//! Peerlink signaling relay
//!
//! Pairs participants by session id and forwards handshake frames between
//! them. The relay never sees media; it only reads the envelope of each frame
//! and consumes `join` requests itself.
//!
//! # Architecture
//!
//! ```text
//! WebSocket (axum) ──> SignalingRelay::handle_frame
//!                          │
//!                          ├── join ──────> RoomRegistry::join ──> joined / peer-joined
//!                          └── offer/answer/candidate ──> RoomRegistry::list_others ──> forward
//! socket close ──────> SignalingRelay::disconnect ──> RoomRegistry::leave ──> peer-left
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use peerlink_relay::{RelayConfig, RelayServer};
//!
//! # async fn example() -> peerlink_relay::RelayResult<()> {
//! let server = RelayServer::bind(RelayConfig::default()).await?;
//! println!("listening on {}", server.local_addr()?);
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod config;
mod error;
mod registry;
mod relay;
mod server;

// Re-exports
pub use config::RelayConfig;
pub use error::{ProblemDetails, RelayError, RelayResult};
pub use registry::{
    Departure, JoinOutcome, Participant, ParticipantId, RelayStats, RoomRegistry,
};
pub use relay::SignalingRelay;
pub use server::{build_router, cors_layer, RelayServer};
