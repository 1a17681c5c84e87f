//! Health snapshot fan-out.
//!
//! # Responsibilities
//! - Keep a registry of subscribers, each with a bounded channel
//! - Periodically push `domain → url → alive` snapshots
//! - Drop the message for a full subscriber, forget a closed one

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

use crate::health::HealthSnapshot;
use crate::registry::Gateway;

/// Per-subscriber channel capacity.
pub const SUBSCRIBER_CAPACITY: usize = 256;

/// Pushes health snapshots to subscribers.
#[derive(Debug, Default)]
pub struct HealthBroadcaster {
    subscribers: DashMap<Uuid, mpsc::Sender<Arc<HealthSnapshot>>>,
}

impl HealthBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<Arc<HealthSnapshot>>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);
        tracing::debug!(subscriber = %id, "Health subscriber added");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &Uuid) -> bool {
        self.subscribers.remove(id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Send one snapshot to every subscriber. Returns how many accepted it.
    pub fn publish(&self, snapshot: HealthSnapshot) -> usize {
        let snapshot = Arc::new(snapshot);
        let mut delivered = 0;
        self.subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&snapshot)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(subscriber = %id, "Health subscriber lagging, message dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = %id, "Health subscriber gone");
                false
            }
        });
        delivered
    }

    /// Publish the gateway's health every `interval` until shutdown.
    pub async fn run(
        self: Arc<Self>,
        gateway: Arc<Gateway>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.subscribers.is_empty() {
                        self.publish(gateway.health());
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health broadcaster received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn snapshot(alive: bool) -> HealthSnapshot {
        let mut urls = BTreeMap::new();
        urls.insert("http://127.0.0.1:3000".to_string(), alive);
        let mut snap = BTreeMap::new();
        snap.insert("a.test".to_string(), urls);
        snap
    }

    #[tokio::test]
    async fn delivers_to_subscribers() {
        let hub = HealthBroadcaster::new();
        let (_, mut rx1) = hub.subscribe();
        let (_, mut rx2) = hub.subscribe();

        assert_eq!(hub.publish(snapshot(true)), 2);
        assert!(rx1.recv().await.unwrap()["a.test"]["http://127.0.0.1:3000"]);
        assert!(rx2.recv().await.unwrap()["a.test"]["http://127.0.0.1:3000"]);
    }

    #[tokio::test]
    async fn full_channel_drops_newest() {
        let hub = HealthBroadcaster::new();
        let (_, mut rx) = hub.subscribe();

        for _ in 0..SUBSCRIBER_CAPACITY {
            hub.publish(snapshot(true));
        }
        assert_eq!(hub.publish(snapshot(false)), 0);
        assert_eq!(hub.subscriber_count(), 1);

        let mut received = 0;
        while let Ok(snap) = rx.try_recv() {
            assert!(snap["a.test"]["http://127.0.0.1:3000"]);
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_CAPACITY);
    }

    #[tokio::test]
    async fn closed_subscribers_are_removed() {
        let hub = HealthBroadcaster::new();
        let (_, rx) = hub.subscribe();
        let (id, _rx2) = hub.subscribe();
        drop(rx);

        assert_eq!(hub.publish(snapshot(true)), 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert!(hub.unsubscribe(&id));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
