//! Room registry - session membership and lifecycle
//!
//! Sessions are created on first join and removed when the last participant
//! leaves. Mutation of one session goes through the `DashMap` entry API, so
//! joins and leaves on the same session are linearized by the shard lock while
//! other sessions proceed independently.

use crate::error::{RelayError, RelayResult};
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use peerlink_protocol::{PeerInfo, Role};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::sync::mpsc;

/// Opaque connection handle assigned by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(u64);

impl ParticipantId {
    /// Wrap a raw id
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p-{}", self.0)
    }
}

/// A connected participant registered in a session
#[derive(Debug, Clone)]
pub struct Participant {
    /// Connection handle
    pub id: ParticipantId,

    /// Role announced in the join request
    pub role: Role,

    /// When the participant joined the session
    pub joined_at: DateTime<Utc>,

    /// Outbound text frames for this participant's socket
    outbound: mpsc::UnboundedSender<String>,
}

impl Participant {
    /// Create a participant bound to a socket's outbound queue
    pub fn new(id: ParticipantId, role: Role, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id,
            role,
            joined_at: Utc::now(),
            outbound,
        }
    }

    /// Queue a text frame for delivery; `false` if the socket is gone
    pub fn deliver(&self, frame: String) -> bool {
        self.outbound.send(frame).is_ok()
    }

    /// Public view of this participant
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            role: self.role,
            handle: self.id.to_string(),
        }
    }
}

/// Result of a successful join
#[derive(Debug)]
pub struct JoinOutcome {
    /// Participant count after the join
    pub count: usize,

    /// Participants that were already present, in join order
    pub others: Vec<Participant>,

    /// Session the participant was moved out of, if it was in another one
    pub previous: Option<Departure>,
}

/// Result of removing a participant from its session
#[derive(Debug)]
pub struct Departure {
    /// Session the participant left
    pub session_id: String,

    /// The participant that left
    pub participant: Participant,

    /// Participants still in the session
    pub remaining: Vec<Participant>,
}

impl Departure {
    /// Whether the session was deleted because it became empty
    pub fn session_closed(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Statistics for the relay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    /// Live sessions
    pub active_sessions: usize,

    /// Live participants across all sessions
    pub active_participants: usize,

    /// Successful joins since start
    pub total_joins: u64,

    /// Leaves since start (including socket closures)
    pub total_leaves: u64,

    /// Joins rejected because the session was full
    pub rejected_joins: u64,

    /// Frames delivered to a recipient
    pub messages_routed: u64,

    /// Frames that could not be delivered to a recipient
    pub messages_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    joins: AtomicU64,
    leaves: AtomicU64,
    rejected: AtomicU64,
    routed: AtomicU64,
    dropped: AtomicU64,
}

/// In-memory session registry
pub struct RoomRegistry {
    /// Session id → participants ordered by join time
    rooms: DashMap<String, Vec<Participant>>,

    /// Participant → session it belongs to
    membership: DashMap<ParticipantId, String>,

    /// Admission cap per session
    max_participants: usize,

    counters: Counters,
}

impl RoomRegistry {
    /// Create an empty registry
    pub fn new(max_participants: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            membership: DashMap::new(),
            max_participants,
            counters: Counters::default(),
        }
    }

    /// Register a participant under a session
    ///
    /// Creates the session if absent. A participant already registered
    /// elsewhere is moved out of that session only once the new session has
    /// admitted it; a rejected join leaves its current membership intact.
    pub fn join(&self, session_id: &str, participant: Participant) -> RelayResult<JoinOutcome> {
        let id = participant.id;
        let current = self.session_of(id);

        let (count, others, mut previous) = match self.rooms.entry(session_id.to_string()) {
            Entry::Occupied(mut room) => {
                let existing = room.get().iter().position(|p| p.id == id);
                let replaced = existing.map(|position| room.get_mut().remove(position));

                if replaced.is_none() && room.get().len() >= self.max_participants {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(RelayError::SessionFull {
                        session_id: session_id.to_string(),
                        max: self.max_participants,
                    });
                }

                let others = room.get().clone();
                room.get_mut().push(participant);

                // Re-joining the same session counts as leave + join
                let previous = replaced.map(|removed| {
                    self.counters.leaves.fetch_add(1, Ordering::Relaxed);
                    Departure {
                        session_id: session_id.to_string(),
                        participant: removed,
                        remaining: others.clone(),
                    }
                });
                (room.get().len(), others, previous)
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![participant]);
                (1, Vec::new(), None)
            }
        };

        // Admitted: now release the slot in the session it came from
        if let Some(old) = current.filter(|old| old != session_id) {
            previous = self.remove_from_room(&old, id);
        }

        self.membership.insert(id, session_id.to_string());
        self.counters.joins.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = %session_id,
            participant = %id,
            count,
            "Participant joined session"
        );

        Ok(JoinOutcome {
            count,
            others,
            previous,
        })
    }

    /// Remove a participant from whichever session holds it
    ///
    /// Deletes the session when it becomes empty.
    pub fn leave(&self, participant: ParticipantId) -> Option<Departure> {
        let (_, session_id) = self.membership.remove(&participant)?;
        self.remove_from_room(&session_id, participant)
    }

    fn remove_from_room(&self, session_id: &str, participant: ParticipantId) -> Option<Departure> {
        let departure = match self.rooms.entry(session_id.to_string()) {
            Entry::Occupied(mut room) => {
                let position = room.get().iter().position(|p| p.id == participant)?;
                let removed = room.get_mut().remove(position);
                let remaining = room.get().clone();
                if remaining.is_empty() {
                    room.remove();
                }
                Departure {
                    session_id: session_id.to_string(),
                    participant: removed,
                    remaining,
                }
            }
            Entry::Vacant(_) => return None,
        };

        self.counters.leaves.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = %departure.session_id,
            participant = %participant,
            remaining = departure.remaining.len(),
            "Participant left session"
        );

        Some(departure)
    }

    /// Snapshot of the participants in a session other than `excluding`
    pub fn list_others(&self, session_id: &str, excluding: ParticipantId) -> Vec<Participant> {
        self.rooms
            .get(session_id)
            .map(|room| room.iter().filter(|p| p.id != excluding).cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every participant in a session, in join order
    pub fn snapshot(&self, session_id: &str) -> Vec<Participant> {
        self.rooms
            .get(session_id)
            .map(|room| room.clone())
            .unwrap_or_default()
    }

    /// Whether a participant is registered in the given session
    pub fn is_member(&self, session_id: &str, participant: ParticipantId) -> bool {
        self.membership
            .get(&participant)
            .map(|s| s.value() == session_id)
            .unwrap_or(false)
    }

    /// Session a participant currently belongs to
    pub fn session_of(&self, participant: ParticipantId) -> Option<String> {
        self.membership.get(&participant).map(|s| s.value().clone())
    }

    /// Live participants in a session (0 if the session does not exist)
    pub fn participant_count(&self, session_id: &str) -> usize {
        self.rooms.get(session_id).map(|room| room.len()).unwrap_or(0)
    }

    /// Whether a session currently exists
    pub fn contains_session(&self, session_id: &str) -> bool {
        self.rooms.contains_key(session_id)
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of live participants across all sessions
    pub fn participant_total(&self) -> usize {
        self.membership.len()
    }

    /// Count a delivered frame
    pub(crate) fn record_routed(&self) {
        self.counters.routed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an undeliverable frame
    pub(crate) fn record_dropped(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get statistics
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            active_sessions: self.session_count(),
            active_participants: self.participant_total(),
            total_joins: self.counters.joins.load(Ordering::Relaxed),
            total_leaves: self.counters.leaves.load(Ordering::Relaxed),
            rejected_joins: self.counters.rejected.load(Ordering::Relaxed),
            messages_routed: self.counters.routed.load(Ordering::Relaxed),
            messages_dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(id: u64, role: Role) -> (Participant, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Participant::new(ParticipantId::new(id), role, tx), rx)
    }

    #[test]
    fn test_first_join_creates_session() {
        let registry = RoomRegistry::new(2);
        let (p, _rx) = participant(1, Role::Initiator);

        let outcome = registry.join("ABCDEFGH", p).unwrap();

        assert_eq!(outcome.count, 1);
        assert!(outcome.others.is_empty());
        assert!(registry.contains_session("ABCDEFGH"));
        assert_eq!(registry.session_of(ParticipantId::new(1)).as_deref(), Some("ABCDEFGH"));
    }

    #[test]
    fn test_second_join_sees_first() {
        let registry = RoomRegistry::new(2);
        let (a, _ra) = participant(1, Role::Initiator);
        let (b, _rb) = participant(2, Role::Responder);

        registry.join("room", a).unwrap();
        let outcome = registry.join("room", b).unwrap();

        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.others.len(), 1);
        assert_eq!(outcome.others[0].role, Role::Initiator);
    }

    #[test]
    fn test_third_join_rejected() {
        let registry = RoomRegistry::new(2);
        let (a, _ra) = participant(1, Role::Initiator);
        let (b, _rb) = participant(2, Role::Responder);
        let (c, _rc) = participant(3, Role::Responder);

        registry.join("room", a).unwrap();
        registry.join("room", b).unwrap();
        let result = registry.join("room", c);

        assert!(matches!(result, Err(RelayError::SessionFull { max: 2, .. })));
        assert_eq!(registry.participant_count("room"), 2);
        assert!(registry.session_of(ParticipantId::new(3)).is_none());
        assert_eq!(registry.stats().rejected_joins, 1);
    }

    #[test]
    fn test_cardinality_after_joins_and_leaves() {
        let registry = RoomRegistry::new(16);
        let mut receivers = Vec::new();

        for n in 0..5u64 {
            let (p, rx) = participant(n, Role::Responder);
            receivers.push(rx);
            registry.join("room", p).unwrap();
        }
        for n in 0..3u64 {
            assert!(registry.leave(ParticipantId::new(n)).is_some());
        }
        assert_eq!(registry.participant_count("room"), 2);

        for n in 3..5u64 {
            registry.leave(ParticipantId::new(n));
        }
        assert!(!registry.contains_session("room"));
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.participant_total(), 0);
    }

    #[test]
    fn test_leave_unknown_participant_is_none() {
        let registry = RoomRegistry::new(2);
        assert!(registry.leave(ParticipantId::new(42)).is_none());
    }

    #[test]
    fn test_leave_reports_remaining() {
        let registry = RoomRegistry::new(2);
        let (a, _ra) = participant(1, Role::Initiator);
        let (b, _rb) = participant(2, Role::Responder);
        registry.join("room", a).unwrap();
        registry.join("room", b).unwrap();

        let departure = registry.leave(ParticipantId::new(2)).unwrap();

        assert_eq!(departure.session_id, "room");
        assert_eq!(departure.participant.role, Role::Responder);
        assert_eq!(departure.remaining.len(), 1);
        assert!(!departure.session_closed());
    }

    #[test]
    fn test_rejoin_moves_participant() {
        let registry = RoomRegistry::new(2);
        let (a, _ra) = participant(1, Role::Initiator);
        registry.join("first", a.clone()).unwrap();

        let outcome = registry.join("second", a).unwrap();

        let previous = outcome.previous.unwrap();
        assert_eq!(previous.session_id, "first");
        assert!(previous.session_closed());
        assert!(!registry.contains_session("first"));
        assert!(registry.is_member("second", ParticipantId::new(1)));
    }

    #[test]
    fn test_rejected_move_keeps_current_session() {
        let registry = RoomRegistry::new(2);
        let (a, _ra) = participant(1, Role::Initiator);
        let (b, _rb) = participant(2, Role::Responder);
        let (c, _rc) = participant(3, Role::Initiator);
        let (d, _rd) = participant(4, Role::Responder);
        registry.join("one", a).unwrap();
        registry.join("one", b.clone()).unwrap();
        registry.join("full", c).unwrap();
        registry.join("full", d).unwrap();

        let result = registry.join("full", b);

        assert!(matches!(result, Err(RelayError::SessionFull { .. })));
        assert_eq!(registry.session_of(ParticipantId::new(2)).as_deref(), Some("one"));
        assert_eq!(registry.participant_count("one"), 2);
        assert_eq!(registry.participant_count("full"), 2);
        assert_eq!(registry.stats().total_leaves, 0);
    }

    #[test]
    fn test_rejoin_same_session_replaces_entry() {
        let registry = RoomRegistry::new(2);
        let (a, _ra) = participant(1, Role::Initiator);
        let (b, _rb) = participant(2, Role::Responder);
        registry.join("room", a).unwrap();
        registry.join("room", b.clone()).unwrap();

        let outcome = registry.join("room", b).unwrap();

        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.others.len(), 1);
        let previous = outcome.previous.unwrap();
        assert_eq!(previous.session_id, "room");
        assert_eq!(previous.remaining.len(), 1);
        assert_eq!(registry.participant_count("room"), 2);
    }

    #[test]
    fn test_list_others_excludes_sender_and_other_sessions() {
        let registry = RoomRegistry::new(2);
        let (a, _ra) = participant(1, Role::Initiator);
        let (b, _rb) = participant(2, Role::Responder);
        let (c, _rc) = participant(3, Role::Initiator);
        registry.join("room", a).unwrap();
        registry.join("room", b).unwrap();
        registry.join("elsewhere", c).unwrap();

        let others = registry.list_others("room", ParticipantId::new(1));

        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, ParticipantId::new(2));
        assert!(registry.list_others("missing", ParticipantId::new(1)).is_empty());
    }

    #[test]
    fn test_session_ids_are_case_sensitive() {
        let registry = RoomRegistry::new(2);
        let (a, _ra) = participant(1, Role::Initiator);
        let (b, _rb) = participant(2, Role::Responder);
        registry.join("abc", a).unwrap();
        registry.join("ABC", b).unwrap();

        assert_eq!(registry.session_count(), 2);
        assert_eq!(registry.participant_count("abc"), 1);
    }

    #[test]
    fn test_concurrent_joins_on_distinct_sessions() {
        let registry = std::sync::Arc::new(RoomRegistry::new(2));
        let handles: Vec<_> = (0..8u64)
            .map(|n| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let (tx, _rx) = mpsc::unbounded_channel();
                    let p = Participant::new(ParticipantId::new(n), Role::Initiator, tx);
                    registry.join(&format!("room-{}", n % 4), p).is_ok()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 8);
        assert_eq!(registry.session_count(), 4);
        assert_eq!(registry.participant_total(), 8);
    }
}
