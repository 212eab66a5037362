//! Subscriber store
//!
//! Thread-safe registry of live conversation subscribers. Fan-out pushes
//! events into per-connection channels; the socket writer drains the
//! channel outside any registry lock, so no lock is held across I/O.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::ChatEvent;

/// One live subscription handle
struct Subscriber {
    connection_id: Uuid,
    #[allow(dead_code)]
    member_id: Uuid,
    sender: mpsc::UnboundedSender<ChatEvent>,
}

/// Subscriber store
///
/// Two-level mapping: conversation id -> subscribers, plus a connection
/// index for O(1) unsubscribe.
pub struct HubStore {
    /// Active subscribers per conversation
    rooms: DashMap<Uuid, Vec<Subscriber>>,
    /// connection id -> conversation id
    connections: DashMap<Uuid, Uuid>,
    /// Current connection count
    count: AtomicUsize,
    /// Maximum allowed connections
    max_connections: usize,
}

impl HubStore {
    /// Create a new store with the given capacity
    pub fn new(max_connections: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
            count: AtomicUsize::new(0),
            max_connections,
        }
    }

    /// Check if the store is at capacity
    pub fn is_at_capacity(&self) -> bool {
        self.count.load(Ordering::Relaxed) >= self.max_connections
    }

    /// Get the current connection count
    pub fn connection_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Number of live subscribers for one conversation
    pub fn subscriber_count(&self, conversation_id: Uuid) -> usize {
        self.rooms
            .get(&conversation_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Register a new subscriber; returns the connection id and the event
    /// channel its writer task drains, or `None` at capacity.
    pub fn subscribe(
        &self,
        conversation_id: Uuid,
        member_id: Uuid,
    ) -> Option<(Uuid, mpsc::UnboundedReceiver<ChatEvent>)> {
        // Reserve the slot first; concurrent subscribers cannot overshoot
        // the configured maximum.
        if self
            .count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                (count < self.max_connections).then_some(count + 1)
            })
            .is_err()
        {
            return None;
        }

        let connection_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();

        self.rooms
            .entry(conversation_id)
            .or_default()
            .push(Subscriber {
                connection_id,
                member_id,
                sender,
            });
        self.connections.insert(connection_id, conversation_id);

        debug!(
            connection = %connection_id,
            conversation = %conversation_id,
            count = self.count.load(Ordering::Relaxed),
            "Hub: subscribed"
        );
        Some((connection_id, receiver))
    }

    /// Deliver an event to one connection only. Returns false if the
    /// connection is gone.
    pub fn send_to(&self, connection_id: Uuid, event: ChatEvent) -> bool {
        let Some(conversation_id) = self.connections.get(&connection_id).map(|c| *c) else {
            return false;
        };
        let Some(subs) = self.rooms.get(&conversation_id) else {
            return false;
        };
        subs.iter()
            .find(|s| s.connection_id == connection_id)
            .map(|s| s.sender.send(event).is_ok())
            .unwrap_or(false)
    }

    /// Deliver an event to every subscriber of a conversation, best-effort.
    ///
    /// A failed push means that subscriber's writer is gone; it is removed
    /// without affecting delivery to the others. Returns the number of
    /// successful deliveries.
    pub fn publish(&self, conversation_id: Uuid, event: &ChatEvent) -> usize {
        let Some(mut subs) = self.rooms.get_mut(&conversation_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead: Vec<Uuid> = Vec::new();
        subs.retain(|sub| {
            if sub.sender.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                dead.push(sub.connection_id);
                false
            }
        });
        drop(subs);

        for connection_id in dead {
            self.connections.remove(&connection_id);
            self.count.fetch_sub(1, Ordering::Relaxed);
            debug!(connection = %connection_id, "Hub: dropped dead subscriber");
        }
        delivered
    }

    /// Remove a connection from whatever conversation it belongs to.
    /// Removing the last subscriber frees the conversation's entry.
    pub fn unsubscribe(&self, connection_id: Uuid) {
        let Some((_, conversation_id)) = self.connections.remove(&connection_id) else {
            return;
        };

        let mut empty = false;
        if let Some(mut subs) = self.rooms.get_mut(&conversation_id) {
            let before = subs.len();
            subs.retain(|s| s.connection_id != connection_id);
            if subs.len() < before {
                self.count.fetch_sub(1, Ordering::Relaxed);
            }
            empty = subs.is_empty();
        }
        if empty {
            self.rooms
                .remove_if(&conversation_id, |_, subs| subs.is_empty());
        }

        debug!(
            connection = %connection_id,
            count = self.count.load(Ordering::Relaxed),
            "Hub: unsubscribed"
        );
    }

    /// Drop every subscriber, closing all event channels
    pub fn shutdown(&self) {
        self.rooms.clear();
        self.connections.clear();
        self.count.store(0, Ordering::Relaxed);
        debug!("Hub: shut down, all subscribers dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_event(content: &str) -> ChatEvent {
        ChatEvent::Connection {
            message: content.to_string(),
            conversation_id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            username: "ada".to_string(),
        }
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let store = HubStore::new(16);
        let conversation = Uuid::new_v4();

        let (_c1, mut r1) = store.subscribe(conversation, Uuid::new_v4()).unwrap();
        let (_c2, mut r2) = store.subscribe(conversation, Uuid::new_v4()).unwrap();
        let (_c3, mut r3) = store.subscribe(conversation, Uuid::new_v4()).unwrap();

        let delivered = store.publish(conversation, &text_event("hello"));
        assert_eq!(delivered, 3);
        for receiver in [&mut r1, &mut r2, &mut r3] {
            assert!(receiver.try_recv().is_ok());
        }
    }

    #[test]
    fn test_dead_subscriber_removed_without_affecting_others() {
        let store = HubStore::new(16);
        let conversation = Uuid::new_v4();

        let (_c1, r1) = store.subscribe(conversation, Uuid::new_v4()).unwrap();
        let (_c2, mut r2) = store.subscribe(conversation, Uuid::new_v4()).unwrap();
        drop(r1); // writer gone

        let delivered = store.publish(conversation, &text_event("hello"));
        assert_eq!(delivered, 1);
        assert!(r2.try_recv().is_ok());
        assert_eq!(store.subscriber_count(conversation), 1);
        assert_eq!(store.connection_count(), 1);
    }

    #[test]
    fn test_unsubscribe_frees_empty_conversation() {
        let store = HubStore::new(16);
        let conversation = Uuid::new_v4();

        let (c1, _r1) = store.subscribe(conversation, Uuid::new_v4()).unwrap();
        assert_eq!(store.connection_count(), 1);

        store.unsubscribe(c1);
        assert_eq!(store.connection_count(), 0);
        assert_eq!(store.subscriber_count(conversation), 0);
        // Idempotent
        store.unsubscribe(c1);
        assert_eq!(store.connection_count(), 0);
    }

    #[test]
    fn test_send_to_targets_one_connection() {
        let store = HubStore::new(16);
        let conversation = Uuid::new_v4();

        let (c1, mut r1) = store.subscribe(conversation, Uuid::new_v4()).unwrap();
        let (_c2, mut r2) = store.subscribe(conversation, Uuid::new_v4()).unwrap();

        assert!(store.send_to(c1, text_event("ack")));
        assert!(r1.try_recv().is_ok());
        assert!(r2.try_recv().is_err());
        assert!(!store.send_to(Uuid::new_v4(), text_event("ack")));
    }

    #[test]
    fn test_capacity_bound_is_enforced() {
        let store = HubStore::new(2);
        let conversation = Uuid::new_v4();
        assert!(!store.is_at_capacity());

        let (_a, _ra) = store.subscribe(conversation, Uuid::new_v4()).unwrap();
        let (b, _rb) = store.subscribe(conversation, Uuid::new_v4()).unwrap();
        assert!(store.is_at_capacity());

        // Full: the next subscriber is refused and nothing is registered
        assert!(store.subscribe(conversation, Uuid::new_v4()).is_none());
        assert_eq!(store.connection_count(), 2);
        assert_eq!(store.subscriber_count(conversation), 2);

        // Unsubscribing frees the slot again
        store.unsubscribe(b);
        assert!(store.subscribe(conversation, Uuid::new_v4()).is_some());
    }

    #[test]
    fn test_events_arrive_in_post_order() {
        let store = HubStore::new(4);
        let conversation = Uuid::new_v4();
        let (_c, mut rx) = store.subscribe(conversation, Uuid::new_v4()).unwrap();

        for i in 0..3 {
            store.publish(conversation, &text_event(&format!("e{}", i)));
        }

        tokio_test::block_on(async {
            for i in 0..3 {
                match rx.recv().await.unwrap() {
                    ChatEvent::Connection { message, .. } => {
                        assert_eq!(message, format!("e{}", i))
                    }
                    _ => unreachable!(),
                }
            }
        });
    }

    #[test]
    fn test_shutdown_closes_channels() {
        let store = HubStore::new(16);
        let conversation = Uuid::new_v4();
        let (_c1, mut r1) = store.subscribe(conversation, Uuid::new_v4()).unwrap();

        store.shutdown();
        assert_eq!(store.connection_count(), 0);
        // Sender dropped: the channel reports disconnect
        assert!(matches!(
            r1.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
