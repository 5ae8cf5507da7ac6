//! Signaling transport - reconnecting WebSocket pipe to the relay
//!
//! The transport owns one background task per `connect()`. The task dials the
//! relay, pumps frames in both directions, and on failure re-dials with a
//! linear backoff until [`ReconnectPolicy::max_attempts`] retries are spent.
//!
//! The only session knowledge it has is the last `join` request, which it
//! replays after every successful (re)connect.

use crate::{
    config::{ClientConfig, ReconnectPolicy},
    error::{TransportError, TransportResult},
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use peerlink_protocol::{Role, SignalingMessage};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on how long `shutdown` waits for the task to exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Events emitted by a [`SignalingTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Socket open (initial connect or reconnect)
    Connected,

    /// Socket lost unexpectedly; a reconnect is scheduled
    Disconnected {
        /// What happened
        reason: String,
    },

    /// Frame from the relay
    Message(SignalingMessage),

    /// Reconnect budget spent; no further automatic attempts
    Exhausted {
        /// Retries made
        attempts: u32,
    },
}

/// Outbound side of the signaling channel, as seen by the negotiator
pub trait SignalSender: Send + Sync {
    /// Send a frame if connected; dropped with a warning otherwise
    fn send(&self, message: &SignalingMessage);

    /// Record the join intent and send it if connected
    fn join(&self, session_id: &str, role: Role);
}

struct TransportInner {
    url: String,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    connected: AtomicBool,
    /// Queue into the live socket's writer, `None` while disconnected
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Last join request; locked before `outbound` everywhere
    join_intent: Mutex<Option<String>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Reconnecting duplex channel to the relay
#[derive(Clone)]
pub struct SignalingTransport {
    inner: Arc<TransportInner>,
}

impl SignalingTransport {
    /// Create a disconnected transport and the receiver for its events
    pub fn new(config: &ClientConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = TransportInner {
            url: config.relay_url.clone(),
            policy: config.reconnect,
            connect_timeout: config.connect_timeout,
            connected: AtomicBool::new(false),
            outbound: Mutex::new(None),
            join_intent: Mutex::new(None),
            events,
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Start the connection task
    ///
    /// No-op while a task is already running. After `Exhausted` or
    /// `disconnect` this starts a fresh task with a reset attempt counter.
    pub fn connect(&self) {
        let mut task = self.inner.task.lock();
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            tracing::debug!(url = %self.inner.url, "Transport already running");
            return;
        }

        let token = CancellationToken::new();
        *self.inner.cancel.lock() = token.clone();

        let inner = self.inner.clone();
        *task = Some(tokio::spawn(inner.run(token)));
    }

    /// Whether a socket is currently open
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Stop the connection task and close the socket
    ///
    /// Idempotent. The join intent is cleared so a later `connect` does not
    /// rejoin on its own.
    pub fn disconnect(&self) {
        let token = self.inner.cancel.lock().clone();
        if token.is_cancelled() {
            return;
        }
        token.cancel();

        *self.inner.join_intent.lock() = None;
        *self.inner.outbound.lock() = None;
        self.inner.connected.store(false, Ordering::SeqCst);

        tracing::debug!(url = %self.inner.url, "Transport disconnect requested");
    }

    /// `disconnect` and wait for the connection task to finish
    pub async fn shutdown(&self) {
        self.disconnect();

        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!(url = %self.inner.url, "Transport task did not stop in time");
            }
        }
    }
}

impl SignalSender for SignalingTransport {
    fn send(&self, message: &SignalingMessage) {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(kind = %message.kind, error = %e, "Failed to encode signaling frame");
                return;
            }
        };

        let outbound = self.inner.outbound.lock();
        match outbound.as_ref() {
            Some(tx) if tx.send(text).is_ok() => {}
            _ => tracing::warn!(
                kind = %message.kind,
                session_id = %message.session_id,
                "Signaling transport not connected, frame dropped"
            ),
        }
    }

    fn join(&self, session_id: &str, role: Role) {
        let text = match SignalingMessage::join(session_id, role).and_then(|m| m.to_text()) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode join request");
                return;
            }
        };

        let mut intent = self.inner.join_intent.lock();
        *intent = Some(text.clone());

        if let Some(tx) = self.inner.outbound.lock().as_ref() {
            let _ = tx.send(text);
        }

        tracing::debug!(session_id = %session_id, role = %role, "Join intent recorded");
    }
}

impl TransportInner {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            let dialed = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.open() => result,
            };

            match dialed {
                Ok(socket) => {
                    attempt = 0;
                    tracing::info!(url = %self.url, "Connected to signaling relay");

                    match self.serve(socket, &cancel).await {
                        Some(reason) => {
                            tracing::warn!(url = %self.url, reason = %reason, "Signaling connection lost");
                            self.emit(TransportEvent::Disconnected { reason });
                        }
                        None => return,
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, attempt, error = %e, "Signaling connect attempt failed");
                }
            }

            attempt += 1;
            match self.policy.delay_for(attempt) {
                Some(delay) => {
                    tracing::info!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling signaling reconnect"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    tracing::error!(
                        url = %self.url,
                        attempts = self.policy.max_attempts,
                        "Signaling reconnect attempts exhausted"
                    );
                    self.emit(TransportEvent::Exhausted {
                        attempts: self.policy.max_attempts,
                    });
                    return;
                }
            }
        }
    }

    async fn open(&self) -> TransportResult<Socket> {
        match tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((socket, _))) => Ok(socket),
            Ok(Err(e)) => Err(TransportError::Connect(e.to_string())),
            Err(_) => Err(TransportError::Timeout(self.connect_timeout)),
        }
    }

    /// Pump frames until the socket drops (`Some(reason)`) or the task is
    /// cancelled (`None`)
    async fn serve(&self, socket: Socket, cancel: &CancellationToken) -> Option<String> {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        {
            let intent = self.join_intent.lock();
            *self.outbound.lock() = Some(tx.clone());
            self.connected.store(true, Ordering::SeqCst);
            if let Some(join) = intent.as_ref() {
                tracing::debug!("Replaying join intent");
                let _ = tx.send(join.clone());
            }
        }
        drop(tx);
        self.emit(TransportEvent::Connected);

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break None;
                }
                Some(frame) = rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        break Some(format!("send failed: {}", e));
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => match SignalingMessage::from_text(text.as_str()) {
                        Ok(message) => self.emit(TransportEvent::Message(message)),
                        Err(e) => tracing::warn!(error = %e, "Ignoring malformed frame from relay"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break Some(
                            frame
                                .map(|f| format!("closed by relay: {}", f.reason.as_str()))
                                .unwrap_or_else(|| "closed by relay".to_string()),
                        );
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break Some("connection closed".to_string()),
                },
            }
        };

        *self.outbound.lock() = None;
        self.connected.store(false, Ordering::SeqCst);
        reason
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}
