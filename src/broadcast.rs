//! Per-query live fan-out registry.
//!
//! Routes point-in-time events to every currently-live subscriber of a query
//! id. Nothing is buffered or replayed: a subscriber that connects after an
//! event was sent never receives it retroactively.

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::ExpertResponse;

/// Event pushed to live subscribers, serialized on the wire as
/// `{"type": "expert_response", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    ExpertResponse(ExpertResponse),
}

/// A live connection's membership in the watcher set for one query id.
///
/// Owned by the registry for its connected lifetime; removed on explicit
/// unsubscribe or on the first failed send.
#[derive(Clone)]
pub struct Subscriber {
    connection_id: Uuid,
    tx: mpsc::Sender<PushEvent>,
}

impl Subscriber {
    pub fn new(connection_id: Uuid, tx: mpsc::Sender<PushEvent>) -> Self {
        Self { connection_id, tx }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }
}

/// Maps query ids to their live subscriber sets.
///
/// Registry size is bounded by query ids with current subscribers: an id's
/// entry is deleted as soon as its set becomes empty.
#[derive(Default)]
pub struct BroadcastRegistry {
    subscribers: DashMap<Uuid, Vec<Subscriber>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under a query id.
    ///
    /// Re-subscribing the same connection id replaces its previous handle,
    /// so the operation is idempotent in effect.
    pub fn subscribe(&self, query_id: Uuid, subscriber: Subscriber) {
        let mut entry = self.subscribers.entry(query_id).or_default();
        entry.retain(|s| s.connection_id != subscriber.connection_id);
        entry.push(subscriber);
        debug!(%query_id, subscribers = entry.len(), "subscriber registered");
    }

    /// Remove a connection; drops the id's entry entirely when it was the
    /// last subscriber.
    pub fn unsubscribe(&self, query_id: Uuid, connection_id: Uuid) {
        if let Some(mut entry) = self.subscribers.get_mut(&query_id) {
            entry.retain(|s| s.connection_id != connection_id);
            let now_empty = entry.is_empty();
            drop(entry);
            if now_empty {
                self.subscribers.remove_if(&query_id, |_, subs| subs.is_empty());
            }
        }
        debug!(%query_id, %connection_id, "subscriber removed");
    }

    /// Deliver an event to every subscriber registered under `query_id` at
    /// the moment of the call.
    ///
    /// Delivery goes through each subscriber's own channel, so one dead or
    /// slow connection never blocks the others. A subscriber whose channel
    /// is closed is implicitly disconnected and removed. An id with no
    /// subscribers is a silent no-op.
    pub fn broadcast(&self, query_id: Uuid, event: &PushEvent) {
        let targets: Vec<Subscriber> = match self.subscribers.get(&query_id) {
            Some(entry) => entry.value().clone(),
            None => return,
        };

        let mut dead = Vec::new();
        for subscriber in targets {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Closed(_)) => dead.push(subscriber.connection_id),
                Err(TrySendError::Full(_)) => {
                    // Live-only semantics: a slow subscriber loses this
                    // event rather than stalling the fan-out.
                    warn!(
                        %query_id,
                        connection_id = %subscriber.connection_id,
                        "subscriber channel full, dropping event"
                    );
                }
            }
        }

        for connection_id in dead {
            self.unsubscribe(query_id, connection_id);
        }
    }

    /// Number of live subscribers for a query id.
    pub fn subscriber_count(&self, query_id: Uuid) -> usize {
        self.subscribers
            .get(&query_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Number of query ids with at least one live subscriber.
    pub fn active_query_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(text: &str) -> PushEvent {
        PushEvent::ExpertResponse(ExpertResponse {
            expert_id: "e1".into(),
            expert_name: "Jane".into(),
            response: text.into(),
            submitted_at: Utc::now(),
        })
    }

    fn attach(registry: &BroadcastRegistry, query_id: Uuid) -> (Uuid, mpsc::Receiver<PushEvent>) {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(16);
        registry.subscribe(query_id, Subscriber::new(connection_id, tx));
        (connection_id, rx)
    }

    #[tokio::test]
    async fn subscriber_receives_broadcast() {
        let registry = BroadcastRegistry::new();
        let query_id = Uuid::new_v4();
        let (_, mut rx) = attach(&registry, query_id);

        registry.broadcast(query_id, &event("hello"));

        let PushEvent::ExpertResponse(resp) = rx.recv().await.unwrap();
        assert_eq!(resp.response, "hello");
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_replay() {
        let registry = BroadcastRegistry::new();
        let query_id = Uuid::new_v4();
        let (_, mut early) = attach(&registry, query_id);

        registry.broadcast(query_id, &event("before"));

        let (_, mut late) = attach(&registry, query_id);
        registry.broadcast(query_id, &event("after"));

        let PushEvent::ExpertResponse(first) = early.recv().await.unwrap();
        assert_eq!(first.response, "before");
        let PushEvent::ExpertResponse(second) = early.recv().await.unwrap();
        assert_eq!(second.response, "after");

        let PushEvent::ExpertResponse(only) = late.recv().await.unwrap();
        assert_eq!(only.response, "after");
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_unknown_id_is_a_no_op() {
        let registry = BroadcastRegistry::new();
        registry.broadcast(Uuid::new_v4(), &event("nobody listening"));
    }

    #[tokio::test]
    async fn dead_subscriber_is_removed_without_affecting_others() {
        let registry = BroadcastRegistry::new();
        let query_id = Uuid::new_v4();
        let (_, dead_rx) = attach(&registry, query_id);
        let (_, mut live_rx) = attach(&registry, query_id);
        drop(dead_rx);

        registry.broadcast(query_id, &event("still here"));

        let PushEvent::ExpertResponse(resp) = live_rx.recv().await.unwrap();
        assert_eq!(resp.response, "still here");
        assert_eq!(registry.subscriber_count(query_id), 1);
    }

    #[tokio::test]
    async fn unsubscribing_last_subscriber_drops_the_entry() {
        let registry = BroadcastRegistry::new();
        let query_id = Uuid::new_v4();
        let (connection_id, _rx) = attach(&registry, query_id);

        assert_eq!(registry.active_query_count(), 1);
        registry.unsubscribe(query_id, connection_id);
        assert_eq!(registry.active_query_count(), 0);

        // Broadcasting after the last unsubscribe must not error.
        registry.broadcast(query_id, &event("into the void"));
    }

    #[tokio::test]
    async fn resubscribing_same_connection_is_idempotent() {
        let registry = BroadcastRegistry::new();
        let query_id = Uuid::new_v4();
        let connection_id = Uuid::new_v4();

        let (tx1, rx1) = mpsc::channel(16);
        registry.subscribe(query_id, Subscriber::new(connection_id, tx1));
        drop(rx1);
        let (tx2, mut rx2) = mpsc::channel(16);
        registry.subscribe(query_id, Subscriber::new(connection_id, tx2));

        assert_eq!(registry.subscriber_count(query_id), 1);
        registry.broadcast(query_id, &event("once"));
        let PushEvent::ExpertResponse(resp) = rx2.recv().await.unwrap();
        assert_eq!(resp.response, "once");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn events_arrive_in_broadcast_order() {
        let registry = BroadcastRegistry::new();
        let query_id = Uuid::new_v4();
        let (_, mut rx) = attach(&registry, query_id);

        for i in 0..4 {
            registry.broadcast(query_id, &event(&format!("msg {i}")));
        }
        for i in 0..4 {
            let PushEvent::ExpertResponse(resp) = rx.recv().await.unwrap();
            assert_eq!(resp.response, format!("msg {i}"));
        }
    }
}
