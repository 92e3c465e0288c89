//! # Room & Peer Registry
//!
//! Authoritative in-memory mapping of connected peers to rooms. The registry
//! is an injectable value owned by [`crate::state::AppState`] rather than a
//! module-level global, so unit tests (and multiple coordinator instances)
//! can each hold their own.
//!
//! Signaling channels are stored behind the [`PeerChannel`] trait: in
//! production that is an actor address, in tests a collecting mock. The
//! registry itself never serializes events; it only hands out channel
//! snapshots for the coordinator to fan out on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Outbound send half of a peer's signaling connection.
///
/// Delivery is fire-and-forget: implementations must not block, and a failed
/// send is the implementation's problem to log, not the caller's to retry.
pub trait PeerChannel: Send + Sync {
    fn send(&self, text: String);
}

/// One connected signaling endpoint.
pub struct Peer {
    pub id: String,
    pub channel: Arc<dyn PeerChannel>,
    /// SFU session id negotiated by the client, if any. Join is accepted
    /// without one; session negotiation is independent of membership.
    pub session_id: Option<String>,
    /// Track names the peer has published to the SFU.
    pub tracks: Vec<String>,
    pub name: Option<String>,
    /// Set when the peer joins a room. A peer stays in that room for the
    /// lifetime of its connection.
    pub room_id: Option<String>,
}

/// A named collaboration session grouping peers.
///
/// Rooms are created lazily on first join and never explicitly deleted; the
/// transcription state machine for a room lives in the session manager,
/// keyed by the same room id.
#[derive(Default)]
struct Room {
    /// Member peer ids in insertion order.
    members: Vec<String>,
}

/// Result of a successful join.
#[derive(Debug, PartialEq)]
pub struct JoinOutcome {
    /// Room the peer was detached from when the join moved it elsewhere,
    /// with whether that room is now empty. None on a first join or a
    /// rejoin into the same room.
    pub vacated: Option<(String, bool)>,
}

/// Public projection of a peer, as sent in membership events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub id: String,
    pub session_id: Option<String>,
    pub tracks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// In-memory peer/room state. All access goes through `&mut self` / `&self`;
/// callers wrap the registry in `Arc<RwLock<..>>` and keep critical sections
/// short (never across an await).
#[derive(Default)]
pub struct Registry {
    peers: HashMap<String, Peer>,
    rooms: HashMap<String, Room>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unjoined peer bound to a fresh unique id.
    pub fn register_peer(&mut self, channel: Arc<dyn PeerChannel>) -> String {
        let id = Uuid::new_v4().to_string();
        self.peers.insert(
            id.clone(),
            Peer {
                id: id.clone(),
                channel,
                session_id: None,
                tracks: Vec::new(),
                name: None,
                room_id: None,
            },
        );
        id
    }

    /// Attach a peer to a room, creating the room lazily.
    ///
    /// A second join from the same peer id overwrites the prior association
    /// (last-write-wins): the peer is removed from its previous room's member
    /// set before being appended to the new one. The vacated room is reported
    /// in the outcome so the caller can announce the departure and run
    /// room-empty side effects; silently emptying a room would abandon its
    /// active session.
    ///
    /// Returns None when the peer id is unknown (e.g. a join raced a close).
    pub fn join_room(
        &mut self,
        peer_id: &str,
        room_id: &str,
        session_id: Option<String>,
        tracks: Vec<String>,
        name: Option<String>,
    ) -> Option<JoinOutcome> {
        if !self.peers.contains_key(peer_id) {
            return None;
        }

        // Detach from any previous room first so membership stays consistent.
        let mut vacated = None;
        if let Some(prev_room) = self.peers.get(peer_id).and_then(|p| p.room_id.clone()) {
            if prev_room != room_id {
                if let Some(room) = self.rooms.get_mut(&prev_room) {
                    room.members.retain(|m| m != peer_id);
                    vacated = Some((prev_room, room.members.is_empty()));
                }
            }
        }

        let peer = self
            .peers
            .get_mut(peer_id)
            .expect("checked contains_key above");
        peer.session_id = session_id;
        peer.tracks = tracks;
        peer.name = name;
        peer.room_id = Some(room_id.to_string());

        let room = self.rooms.entry(room_id.to_string()).or_default();
        if !room.members.iter().any(|m| m == peer_id) {
            room.members.push(peer_id.to_string());
        }
        Some(JoinOutcome { vacated })
    }

    /// Remove a peer from the registry and from its room's member set in one
    /// step, so no orphaned membership entry can be observed.
    ///
    /// Returns the vacated room id and whether that room is now empty, or
    /// None when the peer never joined a room (it is still deregistered).
    pub fn leave_room(&mut self, peer_id: &str) -> Option<(String, bool)> {
        let peer = self.peers.remove(peer_id)?;
        let room_id = peer.room_id?;
        let now_empty = match self.rooms.get_mut(&room_id) {
            Some(room) => {
                room.members.retain(|m| m != peer_id);
                room.members.is_empty()
            }
            None => false,
        };
        Some((room_id, now_empty))
    }

    /// Room members' public projection in insertion order, optionally
    /// excluding one id (used to avoid echoing a peer to itself).
    pub fn list_room_peers(&self, room_id: &str, excluding: Option<&str>) -> Vec<PeerSummary> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        room.members
            .iter()
            .filter(|id| excluding != Some(id.as_str()))
            .filter_map(|id| self.peers.get(id))
            .map(|peer| PeerSummary {
                id: peer.id.clone(),
                session_id: peer.session_id.clone(),
                tracks: peer.tracks.clone(),
                name: peer.name.clone(),
            })
            .collect()
    }

    /// Snapshot of member channels for a broadcast. The snapshot is taken in
    /// current registration order; it is not stable across calls.
    pub fn channels_for_room(
        &self,
        room_id: &str,
        excluding: Option<&str>,
    ) -> Vec<(String, Arc<dyn PeerChannel>)> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        room.members
            .iter()
            .filter(|id| excluding != Some(id.as_str()))
            .filter_map(|id| self.peers.get(id))
            .map(|peer| (peer.id.clone(), Arc::clone(&peer.channel)))
            .collect()
    }

    pub fn channel_for(&self, peer_id: &str) -> Option<Arc<dyn PeerChannel>> {
        self.peers.get(peer_id).map(|p| Arc::clone(&p.channel))
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |r| r.members.len())
    }

    /// Number of rooms with at least one member.
    pub fn occupied_room_count(&self) -> usize {
        self.rooms.values().filter(|r| !r.members.is_empty()).count()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::PeerChannel;
    use std::sync::Mutex;

    /// Channel mock that records everything sent to it.
    #[derive(Default)]
    pub struct RecordingChannel {
        pub sent: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        pub fn messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl PeerChannel for RecordingChannel {
        fn send(&self, text: String) {
            self.sent.lock().unwrap().push(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingChannel;
    use super::*;

    fn channel() -> Arc<RecordingChannel> {
        Arc::new(RecordingChannel::default())
    }

    #[test]
    fn test_peer_count_tracks_opens_and_closes() {
        let mut registry = Registry::new();
        let a = registry.register_peer(channel());
        let b = registry.register_peer(channel());
        let c = registry.register_peer(channel());
        assert_eq!(registry.peer_count(), 3);

        registry.join_room(&a, "demo", None, vec![], None).unwrap();
        registry.join_room(&b, "demo", None, vec![], None).unwrap();
        assert_eq!(registry.peer_count(), 3);

        registry.leave_room(&a);
        // A peer that never joined is still deregistered on close.
        registry.leave_room(&c);
        assert_eq!(registry.peer_count(), 1);
    }

    #[test]
    fn test_join_creates_room_and_preserves_order() {
        let mut registry = Registry::new();
        let a = registry.register_peer(channel());
        let b = registry.register_peer(channel());

        registry
            .join_room(&a, "demo", Some("sfu-a".into()), vec!["mic".into()], Some("Alice".into()))
            .unwrap();
        registry.join_room(&b, "demo", None, vec![], None).unwrap();

        let members = registry.list_room_peers("demo", None);
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].id, a);
        assert_eq!(members[0].session_id.as_deref(), Some("sfu-a"));
        assert_eq!(members[0].tracks, vec!["mic".to_string()]);
        assert_eq!(members[1].id, b);

        let others = registry.list_room_peers("demo", Some(&a));
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, b);
    }

    #[test]
    fn test_rejoin_is_last_write_wins() {
        let mut registry = Registry::new();
        let a = registry.register_peer(channel());

        registry
            .join_room(&a, "demo", Some("s1".into()), vec!["mic".into()], None)
            .unwrap();
        registry
            .join_room(&a, "other", Some("s2".into()), vec!["cam".into()], Some("A".into()))
            .unwrap();

        assert_eq!(registry.member_count("demo"), 0);
        assert_eq!(registry.member_count("other"), 1);
        let members = registry.list_room_peers("other", None);
        assert_eq!(members[0].session_id.as_deref(), Some("s2"));
        assert_eq!(members[0].tracks, vec!["cam".to_string()]);
    }

    #[test]
    fn test_join_reports_vacated_room() {
        let mut registry = Registry::new();
        let a = registry.register_peer(channel());
        let b = registry.register_peer(channel());

        // First joins vacate nothing.
        let outcome = registry.join_room(&a, "demo", None, vec![], None).unwrap();
        assert_eq!(outcome.vacated, None);
        registry.join_room(&b, "demo", None, vec![], None).unwrap();

        // Rejoining the same room is not a move.
        let outcome = registry.join_room(&a, "demo", None, vec![], None).unwrap();
        assert_eq!(outcome.vacated, None);
        assert_eq!(registry.member_count("demo"), 2);

        // Moving away reports the old room; the second move empties it.
        let outcome = registry.join_room(&a, "other", None, vec![], None).unwrap();
        assert_eq!(outcome.vacated, Some(("demo".to_string(), false)));
        let outcome = registry.join_room(&b, "other", None, vec![], None).unwrap();
        assert_eq!(outcome.vacated, Some(("demo".to_string(), true)));
        assert_eq!(registry.member_count("other"), 2);

        assert!(registry.join_room("ghost", "demo", None, vec![], None).is_none());
    }

    #[test]
    fn test_leave_reports_empty_transition() {
        let mut registry = Registry::new();
        let a = registry.register_peer(channel());
        let b = registry.register_peer(channel());
        registry.join_room(&a, "demo", None, vec![], None).unwrap();
        registry.join_room(&b, "demo", None, vec![], None).unwrap();

        let (room, empty) = registry.leave_room(&a).unwrap();
        assert_eq!(room, "demo");
        assert!(!empty);
        assert_eq!(registry.member_count("demo"), 1);

        let (_, empty) = registry.leave_room(&b).unwrap();
        assert!(empty);
        assert_eq!(registry.occupied_room_count(), 0);
    }

    #[test]
    fn test_unknown_room_lists_empty() {
        let registry = Registry::new();
        assert!(registry.list_room_peers("nope", None).is_empty());
        assert!(registry.channels_for_room("nope", None).is_empty());
    }

    #[test]
    fn test_peer_summary_wire_shape() {
        let summary = PeerSummary {
            id: "p1".into(),
            session_id: Some("s1".into()),
            tracks: vec!["mic".into()],
            name: None,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["sessionId"], "s1");
        // Absent names are omitted entirely, not sent as null.
        assert!(json.get("name").is_none());
    }
}
