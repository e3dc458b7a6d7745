// ── Fan-out router ──
//
// Maps live connections to the rooms they occupy and delivers events to
// exactly the current members of a room. Every connection owns a bounded
// outbound queue; publishing never awaits, so a slow connection only ever
// loses its own events.
//
// Room membership lives in two `DashMap`s. Each mutation is a single
// entry-level operation and no guard is held across maps, so concurrent
// join/leave/publish never lose updates or deadlock.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::model::{OutboundEvent, RoomKey};

/// Process-unique identifier of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Receiving end of a connection's outbound queue.
pub type EventReceiver = mpsc::Receiver<Arc<OutboundEvent>>;

struct ConnectionEntry {
    tx: mpsc::Sender<Arc<OutboundEvent>>,
    rooms: HashSet<RoomKey>,
}

enum Delivery {
    Sent,
    Dropped,
    Gone,
}

pub struct Router {
    next_id: AtomicU64,
    queue_depth: usize,
    connections: DashMap<ConnectionId, ConnectionEntry>,
    rooms: DashMap<RoomKey, HashSet<ConnectionId>>,
}

impl Router {
    /// `queue_depth` bounds every connection's outbound queue.
    pub fn new(queue_depth: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    pub fn register(&self) -> (ConnectionId, EventReceiver) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.connections.insert(
            id,
            ConnectionEntry {
                tx,
                rooms: HashSet::new(),
            },
        );
        debug!(connection = %id, "connection registered");
        (id, rx)
    }

    /// Drop a connection and release every room it occupied.
    /// Returns `false` if it was already gone.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let Some((_, entry)) = self.connections.remove(&id) else {
            return false;
        };
        for room in &entry.rooms {
            self.remove_member(room, id);
        }
        debug!(connection = %id, rooms = entry.rooms.len(), "connection unregistered");
        true
    }

    // ── Membership ───────────────────────────────────────────────────

    /// Add `id` to `room`. Returns `true` if it was not already a member.
    pub fn join(&self, id: ConnectionId, room: RoomKey) -> bool {
        if !self.connections.contains_key(&id) {
            return false;
        }
        let joined = self.rooms.entry(room.clone()).or_default().insert(id);
        if let Some(mut entry) = self.connections.get_mut(&id) {
            entry.rooms.insert(room);
        }
        joined
    }

    /// Remove `id` from `room`. Returns `true` if it was a member.
    pub fn leave(&self, id: ConnectionId, room: &RoomKey) -> bool {
        if let Some(mut entry) = self.connections.get_mut(&id) {
            entry.rooms.remove(room);
        }
        self.remove_member(room, id)
    }

    fn remove_member(&self, room: &RoomKey, id: ConnectionId) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => members.remove(&id),
            None => false,
        };
        self.rooms.remove_if(room, |_, members| members.is_empty());
        removed
    }

    /// Remove `id` from every room that still lists it.
    fn forget(&self, id: ConnectionId) {
        let stale: Vec<RoomKey> = self
            .rooms
            .iter()
            .filter(|members| members.contains(&id))
            .map(|members| members.key().clone())
            .collect();
        for room in &stale {
            self.remove_member(room, id);
        }
    }

    pub fn is_member(&self, id: ConnectionId, room: &RoomKey) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(&id))
    }

    pub fn room_size(&self, room: &RoomKey) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // ── Delivery ─────────────────────────────────────────────────────

    /// Deliver `event` to every current member of `room`.
    ///
    /// Returns how many connections accepted it. Events published to one
    /// room from one task arrive at each member in publish order.
    pub fn publish(&self, room: &RoomKey, event: &Arc<OutboundEvent>) -> usize {
        let members: Vec<ConnectionId> = match self.rooms.get(room) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for id in members {
            match self.deliver(id, event) {
                Delivery::Sent => delivered += 1,
                Delivery::Dropped => {}
                Delivery::Gone => {
                    self.remove_member(room, id);
                }
            }
        }
        delivered
    }

    /// Deliver `event` once to every connection that is a member of at
    /// least one of `rooms`.
    pub fn publish_many(&self, rooms: &[RoomKey], event: &Arc<OutboundEvent>) -> usize {
        let mut members = BTreeSet::new();
        for room in rooms {
            if let Some(ids) = self.rooms.get(room) {
                members.extend(ids.iter().copied());
            }
        }

        let mut delivered = 0;
        for id in members {
            match self.deliver(id, event) {
                Delivery::Sent => delivered += 1,
                Delivery::Dropped => {}
                Delivery::Gone => {
                    for room in rooms {
                        self.remove_member(room, id);
                    }
                }
            }
        }
        delivered
    }

    /// Deliver `event` to every live connection regardless of rooms.
    pub fn publish_all(&self, event: &Arc<OutboundEvent>) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        let mut delivered = 0;
        for id in ids {
            match self.deliver(id, event) {
                Delivery::Sent => delivered += 1,
                Delivery::Dropped => {}
                Delivery::Gone => self.forget(id),
            }
        }
        delivered
    }

    /// Deliver `event` to one connection. Returns `false` if it was not queued.
    pub fn send_to(&self, id: ConnectionId, event: OutboundEvent) -> bool {
        matches!(self.deliver(id, &Arc::new(event)), Delivery::Sent)
    }

    fn deliver(&self, id: ConnectionId, event: &Arc<OutboundEvent>) -> Delivery {
        let Some(tx) = self.connections.get(&id).map(|entry| entry.tx.clone()) else {
            return Delivery::Gone;
        };

        match tx.try_send(Arc::clone(event)) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                warn!(
                    connection = %id,
                    event = event.name(),
                    "outbound queue full, event dropped"
                );
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection = %id, "outbound queue closed, evicting");
                self.unregister(id);
                Delivery::Gone
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn event(message: &str) -> Arc<OutboundEvent> {
        Arc::new(OutboundEvent::Error {
            message: message.into(),
        })
    }

    fn drain(rx: &mut EventReceiver) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let OutboundEvent::Error { message } = ev.as_ref() {
                seen.push(message.clone());
            }
        }
        seen
    }

    #[test]
    fn publish_reaches_only_room_members() {
        let router = Router::new(8);
        let (a, mut rx_a) = router.register();
        let (b, mut rx_b) = router.register();
        router.join(a, RoomKey::gateway("G1"));
        router.join(b, RoomKey::gateway("G2"));

        assert_eq!(router.publish(&RoomKey::gateway("G2"), &event("for-g2")), 1);

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec!["for-g2"]);
    }

    #[test]
    fn joining_twice_keeps_one_membership() {
        let router = Router::new(8);
        let (a, mut rx) = router.register();
        assert!(router.join(a, RoomKey::gateway("G1")));
        assert!(!router.join(a, RoomKey::gateway("G1")));
        assert_eq!(router.room_size(&RoomKey::gateway("G1")), 1);

        router.publish(&RoomKey::gateway("G1"), &event("once"));
        assert_eq!(drain(&mut rx), vec!["once"]);
    }

    #[test]
    fn gateway_and_owner_rooms_never_collide() {
        let router = Router::new(8);
        let (a, mut rx) = router.register();
        router.join(a, RoomKey::owner("u-1"));

        assert_eq!(router.publish(&RoomKey::gateway("owner:u-1"), &event("x")), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn per_room_order_is_publish_order() {
        let router = Router::new(8);
        let (a, mut rx) = router.register();
        let room = RoomKey::gateway("G1");
        router.join(a, room.clone());

        for n in 0..5 {
            router.publish(&room, &event(&n.to_string()));
        }
        assert_eq!(drain(&mut rx), vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn leaving_last_member_removes_room() {
        let router = Router::new(8);
        let (a, _rx) = router.register();
        let room = RoomKey::gateway("G1");
        router.join(a, room.clone());
        assert_eq!(router.room_count(), 1);

        assert!(router.leave(a, &room));
        assert!(!router.leave(a, &room));
        assert_eq!(router.room_count(), 0);
    }

    #[test]
    fn full_queue_drops_for_that_connection_only() {
        let router = Router::new(1);
        let (slow, mut rx_slow) = router.register();
        let (fast, mut rx_fast) = router.register();
        let room = RoomKey::gateway("G1");
        router.join(slow, room.clone());
        router.join(fast, room.clone());

        assert_eq!(router.publish(&room, &event("1")), 2);
        assert_eq!(drain(&mut rx_fast), vec!["1"]);
        assert_eq!(router.publish(&room, &event("2")), 1);

        assert_eq!(drain(&mut rx_slow), vec!["1"]);
        assert_eq!(drain(&mut rx_fast), vec!["2"]);
        assert!(router.is_member(slow, &room));
    }

    #[test]
    fn closed_queue_evicts_connection() {
        let router = Router::new(4);
        let (a, rx) = router.register();
        let room = RoomKey::gateway("G1");
        router.join(a, room.clone());
        drop(rx);

        assert_eq!(router.publish(&room, &event("x")), 0);
        assert_eq!(router.connection_count(), 0);
        assert_eq!(router.room_count(), 0);
    }

    #[test]
    fn unregister_releases_all_rooms() {
        let router = Router::new(4);
        let (a, _rx) = router.register();
        router.join(a, RoomKey::gateway("G1"));
        router.join(a, RoomKey::owner("u-1"));

        assert!(router.unregister(a));
        assert!(!router.unregister(a));
        assert_eq!(router.room_count(), 0);
        assert!(!router.join(a, RoomKey::gateway("G1")));
    }

    #[test]
    fn publish_many_delivers_once_per_connection() {
        let router = Router::new(4);
        let (a, mut rx_a) = router.register();
        let (b, mut rx_b) = router.register();
        let (_c, mut rx_c) = router.register();
        router.join(a, RoomKey::gateway("G1"));
        router.join(a, RoomKey::owner("u-1"));
        router.join(b, RoomKey::owner("u-1"));

        let rooms = [RoomKey::gateway("G1"), RoomKey::owner("u-1")];
        assert_eq!(router.publish_many(&rooms, &event("r")), 2);
        assert_eq!(drain(&mut rx_a), vec!["r"]);
        assert_eq!(drain(&mut rx_b), vec!["r"]);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn publish_all_ignores_rooms() {
        let router = Router::new(4);
        let (_a, mut rx_a) = router.register();
        let (b, mut rx_b) = router.register();
        router.join(b, RoomKey::gateway("G9"));

        assert_eq!(router.publish_all(&event("all")), 2);
        assert_eq!(drain(&mut rx_a), vec!["all"]);
        assert_eq!(drain(&mut rx_b), vec!["all"]);
    }

    // A join racing an unregister can leave an id in a room after its
    // connection entry is gone.
    fn leave_stale_member(router: &Router, id: ConnectionId) {
        router.connections.remove(&id);
    }

    #[test]
    fn publish_many_prunes_stale_members() {
        let router = Router::new(4);
        let (a, _rx_a) = router.register();
        let (b, mut rx_b) = router.register();
        router.join(a, RoomKey::gateway("G1"));
        router.join(a, RoomKey::owner("u-1"));
        router.join(b, RoomKey::gateway("G1"));
        leave_stale_member(&router, a);

        let rooms = [RoomKey::gateway("G1"), RoomKey::owner("u-1")];
        assert_eq!(router.publish_many(&rooms, &event("r")), 1);
        assert_eq!(drain(&mut rx_b), vec!["r"]);
        assert!(!router.is_member(a, &RoomKey::gateway("G1")));
        assert_eq!(router.room_size(&RoomKey::gateway("G1")), 1);
        assert_eq!(router.room_count(), 1);
    }

    #[test]
    fn publish_all_prunes_closed_connections() {
        let router = Router::new(4);
        let (a, rx_a) = router.register();
        let (_b, mut rx_b) = router.register();
        router.join(a, RoomKey::gateway("G1"));
        drop(rx_a);

        assert_eq!(router.publish_all(&event("all")), 1);
        assert_eq!(drain(&mut rx_b), vec!["all"]);
        assert_eq!(router.connection_count(), 1);
        assert_eq!(router.room_count(), 0);
    }

    #[test]
    fn forgetting_a_connection_clears_every_room() {
        let router = Router::new(4);
        let (a, _rx) = router.register();
        router.join(a, RoomKey::gateway("G1"));
        router.join(a, RoomKey::owner("u-1"));
        leave_stale_member(&router, a);

        router.forget(a);
        assert_eq!(router.room_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_join_and_leave_lose_no_updates() {
        let router = Arc::new(Router::new(4));
        let room = RoomKey::gateway("G1");
        let mut handles = Vec::new();

        for _ in 0..16 {
            let router = Arc::clone(&router);
            let room = room.clone();
            handles.push(tokio::spawn(async move {
                let (id, rx) = router.register();
                for _ in 0..50 {
                    router.join(id, room.clone());
                    router.leave(id, &room);
                }
                router.join(id, room);
                (id, rx)
            }));
        }

        let mut held = Vec::new();
        for handle in handles {
            held.push(handle.await.unwrap());
        }
        assert_eq!(router.room_size(&room), 16);
    }
}
