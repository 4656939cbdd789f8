//! Room subscription registry.
//!
//! Tracks which rooms the session has joined on the live connection and the
//! callback set attached to each. At most one callback set per room: joining
//! a room that is already joined replaces the callbacks (the new view evicts
//! the old one) without re-issuing a network join.

use std::collections::HashMap;

use tokio::time::{Duration, Instant};

use crate::merge::MergeBuffer;
use crate::presence::PresenceSnapshot;
use crate::protocol::{ChatMessage, RoomId};
use crate::typing::TypingTracker;

/// Callbacks a view attaches when joining a room.
pub struct RoomHandlers {
    pub on_message: Box<dyn FnMut(&ChatMessage) + Send>,
    pub on_typing_changed: Box<dyn FnMut(&[String]) + Send>,
    pub on_presence_changed: Box<dyn FnMut(&PresenceSnapshot) + Send>,
}

impl RoomHandlers {
    pub fn new(
        on_message: impl FnMut(&ChatMessage) + Send + 'static,
        on_typing_changed: impl FnMut(&[String]) + Send + 'static,
        on_presence_changed: impl FnMut(&PresenceSnapshot) + Send + 'static,
    ) -> Self {
        Self {
            on_message: Box::new(on_message),
            on_typing_changed: Box::new(on_typing_changed),
            on_presence_changed: Box::new(on_presence_changed),
        }
    }

    /// Handlers that ignore everything; callers that only use snapshot
    /// queries can join with these.
    pub fn noop() -> Self {
        Self::new(|_| {}, |_| {}, |_| {})
    }
}

impl std::fmt::Debug for RoomHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RoomHandlers")
    }
}

/// Whether the join intent for a room has actually gone out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// Join intent queued but not yet transmitted.
    Pending,
    /// Join intent sent; the server is feeding us frames (optimistic —
    /// the wire has no join ack).
    Joined,
}

/// Everything the session owns for one joined room.
#[derive(Debug)]
pub struct RoomSubscription {
    pub handlers: RoomHandlers,
    pub join_state: JoinState,
    pub merge: MergeBuffer,
    pub typing: TypingTracker,
}

/// All active room subscriptions for a session.
#[derive(Debug, Default)]
pub struct Registry {
    rooms: HashMap<RoomId, RoomSubscription>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach callbacks for a room. Returns `true` if this is a new
    /// subscription and a join intent must be issued; `false` if the room
    /// was already joined and only the callback set was replaced.
    pub fn join(
        &mut self,
        room_id: RoomId,
        handlers: RoomHandlers,
        retention_cap: Option<usize>,
        typing_ttl: Duration,
    ) -> bool {
        match self.rooms.get_mut(&room_id) {
            Some(sub) => {
                sub.handlers = handlers;
                false
            }
            None => {
                self.rooms.insert(
                    room_id,
                    RoomSubscription {
                        handlers,
                        join_state: JoinState::Pending,
                        merge: MergeBuffer::new(retention_cap),
                        typing: TypingTracker::new(typing_ttl),
                    },
                );
                true
            }
        }
    }

    /// Remove a room's subscription, releasing its buffered messages and
    /// typing deadlines. Returns the removed entry so the caller can decide
    /// whether a leave intent is owed (only if the join was ever sent).
    pub fn leave(&mut self, room_id: RoomId) -> Option<RoomSubscription> {
        self.rooms.remove(&room_id)
    }

    pub fn get_mut(&mut self, room_id: RoomId) -> Option<&mut RoomSubscription> {
        self.rooms.get_mut(&room_id)
    }

    pub fn get(&self, room_id: RoomId) -> Option<&RoomSubscription> {
        self.rooms.get(&room_id)
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.keys().copied().collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&RoomId, &mut RoomSubscription)> {
        self.rooms.iter_mut()
    }

    /// Earliest typing deadline across all rooms; drives the session's
    /// single expiry timer.
    pub fn next_typing_deadline(&self) -> Option<Instant> {
        self.rooms
            .values()
            .filter_map(|sub| sub.typing.next_deadline())
            .min()
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(3);

    #[test]
    fn first_join_is_new_second_replaces() {
        let mut registry = Registry::new();
        assert!(registry.join(7, RoomHandlers::noop(), None, TTL));
        assert!(!registry.join(7, RoomHandlers::noop(), None, TTL));
        assert_eq!(registry.room_ids(), vec![7]);
    }

    #[test]
    fn rejoining_replaces_the_callback_set() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut registry = Registry::new();
        let count = first.clone();
        registry.join(
            7,
            RoomHandlers::new(
                move |_| {
                    count.fetch_add(1, Ordering::Relaxed);
                },
                |_| {},
                |_| {},
            ),
            None,
            TTL,
        );
        let count = second.clone();
        registry.join(
            7,
            RoomHandlers::new(
                move |_| {
                    count.fetch_add(1, Ordering::Relaxed);
                },
                |_| {},
                |_| {},
            ),
            None,
            TTL,
        );

        let sub = registry.get_mut(7).unwrap();
        let message = crate::protocol::ChatMessage {
            id: 1,
            room_id: 7,
            sender: crate::protocol::Sender {
                user_id: "u1".into(),
                display_name: "Alice".into(),
                is_admin: false,
            },
            body: "hi".into(),
            kind: crate::protocol::MessageKind::Text,
            created_at: 100,
            reaction_count: 0,
        };
        (sub.handlers.on_message)(&message);

        // The evicted view's callback never fires
        assert_eq!(first.load(Ordering::Relaxed), 0);
        assert_eq!(second.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn leave_releases_the_room() {
        let mut registry = Registry::new();
        registry.join(7, RoomHandlers::noop(), None, TTL);
        assert!(registry.leave(7).is_some());
        assert!(registry.leave(7).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn next_typing_deadline_spans_rooms() {
        let mut registry = Registry::new();
        registry.join(1, RoomHandlers::noop(), None, TTL);
        registry.join(2, RoomHandlers::noop(), None, TTL);
        assert!(registry.next_typing_deadline().is_none());

        let now = Instant::now();
        registry
            .get_mut(2)
            .unwrap()
            .typing
            .signal("u9", "Zoe", true, now);
        registry
            .get_mut(1)
            .unwrap()
            .typing
            .signal("u8", "Yan", true, now + Duration::from_secs(1));

        assert_eq!(registry.next_typing_deadline(), Some(now + TTL));
    }
}
