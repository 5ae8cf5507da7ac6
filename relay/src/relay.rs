//! Frame dispatch for the signaling relay
//!
//! The relay consumes `join` frames itself and forwards `offer`, `answer` and
//! `candidate` frames verbatim to the other participants of the sender's
//! session. Every failure is reported back to the sender as an `error` frame;
//! none of them close the socket.

use crate::{
    config::RelayConfig,
    error::{RelayError, RelayResult},
    registry::{Departure, Participant, ParticipantId, RoomRegistry},
};
use peerlink_protocol::{validate_session_id, JoinPayload, MessageKind, SignalingMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Session-scoped message relay
pub struct SignalingRelay {
    config: RelayConfig,
    registry: RoomRegistry,
    next_id: AtomicU64,
}

impl SignalingRelay {
    /// Create a relay with an empty registry
    pub fn new(config: RelayConfig) -> Self {
        let registry = RoomRegistry::new(config.max_participants_per_session);
        Self {
            config,
            registry,
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the handle for a newly accepted socket
    pub fn next_participant_id(&self) -> ParticipantId {
        ParticipantId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Session registry
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Handle one inbound text frame from `sender`
    ///
    /// Errors are logged and answered with an `error` frame on `outbound`.
    pub fn handle_frame(
        &self,
        sender: ParticipantId,
        outbound: &mpsc::UnboundedSender<String>,
        text: &str,
    ) {
        let mut session_id = String::new();
        let result = self.dispatch(sender, outbound, text, &mut session_id);

        if let Err(e) = result {
            tracing::warn!(
                participant = %sender,
                session_id = %session_id,
                error = %e,
                "Rejected signaling frame"
            );
            reply_error(outbound, &session_id, &e);
        }
    }

    /// Report a frame the relay cannot interpret at all (binary data)
    pub fn reject_unsupported(
        &self,
        sender: ParticipantId,
        outbound: &mpsc::UnboundedSender<String>,
        what: &str,
    ) {
        let err = RelayError::MalformedFrame(format!("{} frames are not supported", what));
        tracing::warn!(participant = %sender, error = %err, "Rejected signaling frame");
        reply_error(outbound, "", &err);
    }

    fn dispatch(
        &self,
        sender: ParticipantId,
        outbound: &mpsc::UnboundedSender<String>,
        text: &str,
        session_id: &mut String,
    ) -> RelayResult<()> {
        if text.len() > self.config.max_message_size {
            return Err(RelayError::FrameTooLarge {
                size: text.len(),
                max: self.config.max_message_size,
            });
        }

        let message = SignalingMessage::from_text(text)?;
        session_id.clone_from(&message.session_id);

        match message.kind {
            MessageKind::Join => {
                let joined = self.handle_join(sender, outbound, &message)?;
                *session_id = joined;
                Ok(())
            }
            kind if kind.is_relayed() => self.route(sender, &message, text).map(|_| ()),
            kind => Err(RelayError::ForbiddenKind(kind.to_string())),
        }
    }

    /// Register `sender` in the session named by a `join` frame
    ///
    /// Replies `joined` to the sender and `peer-joined` to everyone already
    /// present. Returns the session id joined.
    pub fn handle_join(
        &self,
        sender: ParticipantId,
        outbound: &mpsc::UnboundedSender<String>,
        message: &SignalingMessage,
    ) -> RelayResult<String> {
        let payload: JoinPayload = message.payload_as()?;
        let session_id = if payload.session_id.is_empty() {
            message.session_id.clone()
        } else {
            payload.session_id
        };
        validate_session_id(&session_id, self.config.max_session_id_len)?;

        let participant = Participant::new(sender, payload.role, outbound.clone());
        let info = participant.info();
        let outcome = self.registry.join(&session_id, participant)?;

        if let Some(previous) = &outcome.previous {
            self.notify_departure(previous);
        }

        let peers = outcome.others.iter().map(Participant::info).collect();
        let joined = SignalingMessage::joined(&session_id, outcome.count, peers)?.to_text()?;
        if outbound.send(joined).is_err() {
            tracing::debug!(participant = %sender, "Joiner socket closed before confirmation");
        }

        let announcement = SignalingMessage::peer_joined(&session_id, info)?.to_text()?;
        self.fan_out(&outcome.others, &announcement);

        tracing::info!(
            session_id = %session_id,
            participant = %sender,
            role = %payload.role,
            count = outcome.count,
            "Participant joined"
        );

        Ok(session_id)
    }

    /// Forward a pass-through frame to the other participants of its session
    ///
    /// Returns the number of recipients the frame was queued for.
    pub fn route(
        &self,
        sender: ParticipantId,
        message: &SignalingMessage,
        raw: &str,
    ) -> RelayResult<usize> {
        if !self.registry.is_member(&message.session_id, sender) {
            return Err(RelayError::NotInSession(message.session_id.clone()));
        }

        let recipients = self.registry.list_others(&message.session_id, sender);
        let delivered = self.fan_out(&recipients, raw);

        tracing::debug!(
            session_id = %message.session_id,
            participant = %sender,
            kind = %message.kind,
            recipients = recipients.len(),
            delivered,
            "Routed signaling frame"
        );

        Ok(delivered)
    }

    /// Remove a closed socket from its session and notify the others
    pub fn disconnect(&self, participant: ParticipantId) {
        if let Some(departure) = self.registry.leave(participant) {
            tracing::info!(
                session_id = %departure.session_id,
                participant = %participant,
                remaining = departure.remaining.len(),
                "Participant disconnected"
            );
            self.notify_departure(&departure);
        }
    }

    fn notify_departure(&self, departure: &Departure) {
        if departure.session_closed() {
            tracing::debug!(session_id = %departure.session_id, "Session closed");
            return;
        }

        let frame = SignalingMessage::peer_left(
            &departure.session_id,
            &departure.participant.id.to_string(),
            departure.participant.role,
        )
        .and_then(|m| m.to_text());

        match frame {
            Ok(frame) => {
                self.fan_out(&departure.remaining, &frame);
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode peer-left"),
        }
    }

    fn fan_out(&self, recipients: &[Participant], frame: &str) -> usize {
        let mut delivered = 0;
        for recipient in recipients {
            if recipient.deliver(frame.to_string()) {
                self.registry.record_routed();
                delivered += 1;
            } else {
                self.registry.record_dropped();
                tracing::warn!(participant = %recipient.id, "Recipient socket closed, frame dropped");
            }
        }
        delivered
    }
}

fn reply_error(outbound: &mpsc::UnboundedSender<String>, session_id: &str, err: &RelayError) {
    match SignalingMessage::error(session_id, err.to_string()).and_then(|m| m.to_text()) {
        Ok(frame) => {
            let _ = outbound.send(frame);
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode error reply"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_protocol::{
        ErrorPayload, IceCandidate, JoinedPayload, PeerInfo, PeerLeftPayload, Role,
    };

    struct Client {
        id: ParticipantId,
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<String>,
    }

    impl Client {
        fn new(relay: &SignalingRelay) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                id: relay.next_participant_id(),
                tx,
                rx,
            }
        }

        fn send(&self, relay: &SignalingRelay, message: &SignalingMessage) {
            relay.handle_frame(self.id, &self.tx, &message.to_text().unwrap());
        }

        fn next(&mut self) -> SignalingMessage {
            let text = self.rx.try_recv().expect("expected a frame");
            SignalingMessage::from_text(&text).unwrap()
        }

        fn is_idle(&mut self) -> bool {
            self.rx.try_recv().is_err()
        }
    }

    fn relay() -> SignalingRelay {
        SignalingRelay::new(RelayConfig::default())
    }

    #[test]
    fn test_join_sequence() {
        let relay = relay();
        let mut a = Client::new(&relay);
        let mut b = Client::new(&relay);

        a.send(&relay, &SignalingMessage::join("ABCDEFGH", Role::Initiator).unwrap());
        let joined: JoinedPayload = a.next().payload_as().unwrap();
        assert_eq!(joined.current_participant_count, 1);
        assert!(joined.peers.is_empty());

        b.send(&relay, &SignalingMessage::join("ABCDEFGH", Role::Responder).unwrap());
        let joined: JoinedPayload = b.next().payload_as().unwrap();
        assert_eq!(joined.current_participant_count, 2);
        assert_eq!(joined.peers[0].role, Role::Initiator);

        let announced = a.next();
        assert_eq!(announced.kind, MessageKind::PeerJoined);
        let peer: PeerInfo = announced.payload_as().unwrap();
        assert_eq!(peer.role, Role::Responder);
        assert_eq!(peer.handle, b.id.to_string());
    }

    #[test]
    fn test_forward_is_verbatim_and_not_echoed() {
        let relay = relay();
        let mut a = Client::new(&relay);
        let mut b = Client::new(&relay);
        a.send(&relay, &SignalingMessage::join("room", Role::Initiator).unwrap());
        b.send(&relay, &SignalingMessage::join("room", Role::Responder).unwrap());
        a.next();
        a.next();
        b.next();

        // Unknown payload fields survive because the raw text is forwarded
        let raw = r#"{"sessionId":"room","kind":"candidate","payload":{"candidate":{"candidate":"c1"},"extra":[1,2]}}"#;
        relay.handle_frame(a.id, &a.tx, raw);

        assert_eq!(b.rx.try_recv().unwrap(), raw);
        assert!(a.is_idle());
        assert_eq!(relay.registry().stats().messages_routed, 2);
    }

    #[test]
    fn test_route_requires_membership() {
        let relay = relay();
        let mut a = Client::new(&relay);
        let mut b = Client::new(&relay);
        a.send(&relay, &SignalingMessage::join("room", Role::Initiator).unwrap());
        a.next();

        let candidate = SignalingMessage::candidate("room", IceCandidate::new("c1")).unwrap();
        b.send(&relay, &candidate);

        let reply = b.next();
        assert_eq!(reply.kind, MessageKind::Error);
        assert!(a.is_idle());
    }

    #[test]
    fn test_third_joiner_rejected() {
        let relay = relay();
        let mut a = Client::new(&relay);
        let mut b = Client::new(&relay);
        let mut c = Client::new(&relay);
        a.send(&relay, &SignalingMessage::join("room", Role::Initiator).unwrap());
        b.send(&relay, &SignalingMessage::join("room", Role::Responder).unwrap());
        a.next();
        a.next();
        b.next();

        c.send(&relay, &SignalingMessage::join("room", Role::Responder).unwrap());

        let reply = c.next();
        assert_eq!(reply.kind, MessageKind::Error);
        let error: ErrorPayload = reply.payload_as().unwrap();
        assert_eq!(error.message, "session room is full");
        assert!(a.is_idle());
        assert!(b.is_idle());
        assert_eq!(relay.registry().participant_count("room"), 2);
    }

    #[test]
    fn test_malformed_frames_leave_registry_untouched() {
        let relay = relay();
        let mut a = Client::new(&relay);

        relay.handle_frame(a.id, &a.tx, "not json");
        assert_eq!(a.next().kind, MessageKind::Error);

        relay.handle_frame(a.id, &a.tx, r#"{"sessionId":"room","kind":"join","payload":{}}"#);
        assert_eq!(a.next().kind, MessageKind::Error);

        relay.handle_frame(a.id, &a.tx, r#"{"sessionId":"room","kind":"peer-left"}"#);
        assert_eq!(a.next().kind, MessageKind::Error);

        assert_eq!(relay.registry().session_count(), 0);

        // Still usable afterwards
        a.send(&relay, &SignalingMessage::join("room", Role::Initiator).unwrap());
        assert_eq!(a.next().kind, MessageKind::Joined);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let relay = SignalingRelay::new(RelayConfig {
            max_message_size: 32,
            ..Default::default()
        });
        let mut a = Client::new(&relay);

        relay.handle_frame(a.id, &a.tx, &"x".repeat(33));

        let error: ErrorPayload = a.next().payload_as().unwrap();
        assert!(error.message.contains("too large"));
    }

    #[test]
    fn test_disconnect_notifies_remaining() {
        let relay = relay();
        let mut a = Client::new(&relay);
        let mut b = Client::new(&relay);
        a.send(&relay, &SignalingMessage::join("room", Role::Initiator).unwrap());
        b.send(&relay, &SignalingMessage::join("room", Role::Responder).unwrap());
        a.next();
        a.next();

        relay.disconnect(b.id);

        let left = a.next();
        assert_eq!(left.kind, MessageKind::PeerLeft);
        let payload: PeerLeftPayload = left.payload_as().unwrap();
        assert_eq!(payload.role, Some(Role::Responder));
        assert_eq!(payload.handle, b.id.to_string());

        relay.disconnect(a.id);
        assert!(!relay.registry().contains_session("room"));

        // Second disconnect is a no-op
        relay.disconnect(a.id);
    }

    #[test]
    fn test_switching_sessions_notifies_old_session() {
        let relay = relay();
        let mut a = Client::new(&relay);
        let mut b = Client::new(&relay);
        a.send(&relay, &SignalingMessage::join("one", Role::Initiator).unwrap());
        b.send(&relay, &SignalingMessage::join("one", Role::Responder).unwrap());
        a.next();
        a.next();
        b.next();

        b.send(&relay, &SignalingMessage::join("two", Role::Responder).unwrap());

        assert_eq!(a.next().kind, MessageKind::PeerLeft);
        assert_eq!(b.next().kind, MessageKind::Joined);
        assert_eq!(relay.registry().session_of(b.id).as_deref(), Some("two"));
    }

    #[test]
    fn test_join_into_full_session_keeps_old_membership() {
        let relay = relay();
        let mut a = Client::new(&relay);
        let mut b = Client::new(&relay);
        let mut c = Client::new(&relay);
        let mut d = Client::new(&relay);
        a.send(&relay, &SignalingMessage::join("one", Role::Initiator).unwrap());
        b.send(&relay, &SignalingMessage::join("one", Role::Responder).unwrap());
        c.send(&relay, &SignalingMessage::join("full", Role::Initiator).unwrap());
        d.send(&relay, &SignalingMessage::join("full", Role::Responder).unwrap());
        a.next();
        a.next();
        b.next();
        c.next();
        c.next();
        d.next();

        b.send(&relay, &SignalingMessage::join("full", Role::Responder).unwrap());

        assert_eq!(b.next().kind, MessageKind::Error);
        assert_eq!(relay.registry().session_of(b.id).as_deref(), Some("one"));
        assert_eq!(relay.registry().participant_count("one"), 2);
        assert!(a.is_idle());
        assert!(c.is_idle());
        assert!(d.is_idle());

        // The pair in "one" still talks
        let candidate = SignalingMessage::candidate("one", IceCandidate::new("c1")).unwrap();
        b.send(&relay, &candidate);
        assert_eq!(a.next(), candidate);
    }
}
