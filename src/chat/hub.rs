//! In-memory registry of live chat subscribers and per-room fan-out.
//!
//! One reader/writer lock guards the `room -> subscribers` map. Registration
//! takes it exclusively; broadcast only reads the subscriber set and pushes
//! into each mailbox with `try_send`, so a stalled subscriber can neither block
//! the broadcaster nor extend the critical section.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::metrics::ChatMetrics;

use super::ChatMessage;

/// Sending half of a subscriber's bounded mailbox.
///
/// Cloning keeps the same identity; the hub keys subscribers by [`Mailbox::id`].
#[derive(Debug, Clone)]
pub struct Mailbox {
    id: Uuid,
    sender: mpsc::Sender<Arc<ChatMessage>>,
}

impl Mailbox {
    /// Create a mailbox holding at most `capacity` undelivered messages.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<ChatMessage>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Per-subscriber result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastOutcome {
    /// Mailboxes that accepted the message
    pub delivered: usize,
    /// Mailboxes that were full; the message was dropped for them only
    pub dropped: usize,
    /// Mailboxes whose session already went away
    pub closed: usize,
}

impl BroadcastOutcome {
    pub fn recipients(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }
}

#[derive(Debug, Default)]
struct HubCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicU64,
}

/// Lifetime fan-out counters
#[derive(Debug, Clone, Serialize)]
pub struct HubStatsSnapshot {
    pub rooms: usize,
    pub subscribers: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub closed: u64,
}

type Rooms = HashMap<String, HashMap<Uuid, Mailbox>>;

/// Registry of chat rooms and their subscriber mailboxes.
///
/// A room exists only while it has at least one subscriber. Construct once and
/// share it through `Arc`.
#[derive(Debug, Default)]
pub struct RoomHub {
    rooms: RwLock<Rooms>,
    counters: HubCounters,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    // Registry sections never panic while holding the lock, so a poisoned lock
    // still guards a consistent map.
    fn read_rooms(&self) -> RwLockReadGuard<'_, Rooms> {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rooms(&self) -> RwLockWriteGuard<'_, Rooms> {
        self.rooms.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a mailbox to a room, creating the room if needed.
    ///
    /// Returns `false` if this mailbox was already registered there.
    pub fn register(&self, room_id: &str, mailbox: &Mailbox) -> bool {
        let mut rooms = self.write_rooms();
        let subscribers = rooms.entry(room_id.to_string()).or_default();
        let added = subscribers.insert(mailbox.id, mailbox.clone()).is_none();
        let subscriber_count = subscribers.len();
        ChatMetrics::set_active_rooms(rooms.len());
        drop(rooms);

        tracing::debug!(
            room_id = %room_id,
            subscriber_id = %mailbox.id,
            subscribers = subscriber_count,
            added,
            "Subscriber registered"
        );
        added
    }

    /// Remove a mailbox; the room entry goes away with its last subscriber.
    ///
    /// Returns `false` if the mailbox was not registered in that room.
    pub fn unregister(&self, room_id: &str, mailbox_id: Uuid) -> bool {
        let mut rooms = self.write_rooms();
        let Some(subscribers) = rooms.get_mut(room_id) else {
            return false;
        };

        let removed = subscribers.remove(&mailbox_id).is_some();
        let remaining = subscribers.len();
        if remaining == 0 {
            rooms.remove(room_id);
        }
        ChatMetrics::set_active_rooms(rooms.len());
        drop(rooms);

        tracing::debug!(
            room_id = %room_id,
            subscriber_id = %mailbox_id,
            remaining,
            removed,
            "Subscriber unregistered"
        );
        removed
    }

    /// Offer `message` to every current subscriber of `room_id`.
    ///
    /// Never waits on a mailbox: a full mailbox loses this message and the
    /// remaining subscribers are still served.
    pub fn broadcast(&self, room_id: &str, message: Arc<ChatMessage>) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();

        {
            let rooms = self.read_rooms();
            let Some(subscribers) = rooms.get(room_id) else {
                tracing::trace!(room_id = %room_id, "Broadcast to room without subscribers");
                return outcome;
            };

            for mailbox in subscribers.values() {
                match mailbox.sender.try_send(Arc::clone(&message)) {
                    Ok(()) => outcome.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        outcome.dropped += 1;
                        tracing::warn!(
                            room_id = %room_id,
                            subscriber_id = %mailbox.id,
                            message_id = %message.id,
                            "Subscriber mailbox full, message dropped"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        // Session is tearing down and will unregister itself.
                        outcome.closed += 1;
                        tracing::debug!(
                            room_id = %room_id,
                            subscriber_id = %mailbox.id,
                            "Subscriber mailbox closed"
                        );
                    }
                }
            }
        }

        self.counters
            .delivered
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.counters
            .dropped
            .fetch_add(outcome.dropped as u64, Ordering::Relaxed);
        self.counters
            .closed
            .fetch_add(outcome.closed as u64, Ordering::Relaxed);
        ChatMetrics::record_fanout(outcome.delivered, outcome.dropped, outcome.closed);

        outcome
    }

    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.read_rooms().get(room_id).map_or(0, HashMap::len)
    }

    pub fn room_count(&self) -> usize {
        self.read_rooms().len()
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.read_rooms().contains_key(room_id)
    }

    pub fn stats(&self) -> HubStatsSnapshot {
        let (rooms, subscribers) = {
            let rooms = self.read_rooms();
            (rooms.len(), rooms.values().map(HashMap::len).sum())
        };

        HubStatsSnapshot {
            rooms,
            subscribers,
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            closed: self.counters.closed.load(Ordering::Relaxed),
        }
    }
}
