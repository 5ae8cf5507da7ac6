//! HTTP/WebSocket surface of the relay
//!
//! - `GET /ws` - signaling socket
//! - `GET /health` - liveness plus session/participant counts
//! - `GET /stats` - [`RelayStats`](crate::RelayStats)
//! - `GET /sessions/{id}` - participants of a live session

use crate::{
    config::RelayConfig,
    error::{RelayError, RelayResult},
    relay::SignalingRelay,
};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use peerlink_protocol::PeerInfo;
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::mpsc,
    time::{interval, Instant, MissedTickBehavior},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the relay router around a shared [`SignalingRelay`]
pub fn build_router(relay: Arc<SignalingRelay>) -> Router {
    let cors = cors_layer(relay.config());

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/sessions/{id}", get(session_info))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(relay)
}

/// Create CORS layer from configuration
pub fn cors_layer(config: &RelayConfig) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(relay): State<Arc<SignalingRelay>>) -> Response {
    let max = relay.config().max_message_size;
    ws.max_message_size(max)
        .on_upgrade(move |socket| handle_socket(socket, relay))
}

async fn handle_socket(socket: WebSocket, relay: Arc<SignalingRelay>) {
    let id = relay.next_participant_id();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let ping_interval = relay.config().ping_interval();
    let idle_timeout = relay.config().idle_timeout();

    tracing::debug!(participant = %id, "Signaling socket opened");

    let writer = tokio::spawn(async move {
        let mut ping = interval(ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            let message = tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => Message::Text(frame.into()),
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Bytes::new()),
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Any inbound frame, pongs included, proves the peer is still there
    let mut last_seen = Instant::now();
    let mut liveness = interval(ping_interval);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            message = stream.next() => match message {
                Some(message) => message,
                None => break,
            },
            _ = liveness.tick() => {
                if last_seen.elapsed() > idle_timeout {
                    tracing::warn!(participant = %id, timeout = ?idle_timeout, "Signaling socket went silent, dropping");
                    break;
                }
                continue;
            }
        };
        last_seen = Instant::now();

        match message {
            Ok(Message::Text(text)) => relay.handle_frame(id, &tx, text.as_str()),
            Ok(Message::Binary(_)) => relay.reject_unsupported(id, &tx, "binary"),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(participant = %id, error = %e, "Signaling socket error");
                break;
            }
        }
    }

    relay.disconnect(id);
    drop(tx);
    writer.abort();

    tracing::debug!(participant = %id, "Signaling socket closed");
}

async fn health(State(relay): State<Arc<SignalingRelay>>) -> Json<serde_json::Value> {
    let registry = relay.registry();
    Json(serde_json::json!({
        "status": "ok",
        "sessions": registry.session_count(),
        "participants": registry.participant_total(),
    }))
}

async fn stats(State(relay): State<Arc<SignalingRelay>>) -> Json<crate::RelayStats> {
    Json(relay.registry().stats())
}

async fn session_info(
    Path(id): Path<String>,
    State(relay): State<Arc<SignalingRelay>>,
) -> RelayResult<Json<serde_json::Value>> {
    if !relay.registry().contains_session(&id) {
        return Err(RelayError::SessionNotFound(id));
    }

    let participants: Vec<PeerInfo> = relay
        .registry()
        .snapshot(&id)
        .iter()
        .map(|p| p.info())
        .collect();

    Ok(Json(serde_json::json!({
        "sessionId": id,
        "participants": participants,
    })))
}

/// A bound relay server
pub struct RelayServer {
    listener: TcpListener,
    relay: Arc<SignalingRelay>,
}

impl RelayServer {
    /// Validate the config and bind the listening socket
    pub async fn bind(config: RelayConfig) -> RelayResult<Self> {
        config.validate().map_err(RelayError::Internal)?;

        let listener = TcpListener::bind(config.bind_addr()).await?;
        let relay = Arc::new(SignalingRelay::new(config));

        Ok(Self { listener, relay })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared relay state, for inspection
    pub fn relay(&self) -> Arc<SignalingRelay> {
        self.relay.clone()
    }

    /// Serve until the process exits
    pub async fn run(self) -> RelayResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then stop accepting connections
    pub async fn run_until<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        let router = build_router(self.relay);

        tracing::info!("Signaling relay listening on {}", addr);

        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Signaling relay stopped");
        Ok(())
    }
}
