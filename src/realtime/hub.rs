//! Subscriber interest map and fan-out
//!
//! Each subscriber gets a bounded outbound queue. Delivery uses `try_send`, so
//! a slow or gone subscriber loses updates instead of stalling the engine.

use super::protocol::ServerMessage;
use crate::transport::TokenUpdate;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

pub type SubscriberId = String;

/// Interest of one subscriber and what it was last sent per token
#[derive(Debug, Default)]
struct Subscription {
    tokens: HashSet<String>,
    last_delivery: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub tokens: usize,
    pub subscriptions: usize,
    pub connections: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub deduplicated: u64,
}

pub struct RealtimeHub {
    interests: DashMap<String, HashSet<SubscriberId>>,
    subscriptions: DashMap<SubscriberId, Subscription>,
    sinks: DashMap<SubscriberId, mpsc::Sender<ServerMessage>>,
    next_id: AtomicU64,
    buffer: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
    deduplicated: AtomicU64,
}

impl RealtimeHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            interests: DashMap::new(),
            subscriptions: DashMap::new(),
            sinks: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
        }
    }

    pub fn next_subscriber_id(&self) -> SubscriberId {
        format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Open the outbound queue for a subscriber's connection
    pub fn attach(&self, subscriber: &str) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.sinks.insert(subscriber.to_string(), tx);
        rx
    }

    /// Handle for replying on a subscriber's own queue
    pub fn sender(&self, subscriber: &str) -> Option<mpsc::Sender<ServerMessage>> {
        self.sinks.get(subscriber).map(|tx| tx.clone())
    }

    /// Idempotent; returns true if the interest is new
    pub fn subscribe(&self, subscriber: &str, token: &str) -> bool {
        let added = self
            .subscriptions
            .entry(subscriber.to_string())
            .or_default()
            .tokens
            .insert(token.to_string());

        self.interests
            .entry(token.to_string())
            .or_default()
            .insert(subscriber.to_string());

        if added {
            debug!(subscriber, token, "Subscribed");
        }
        added
    }

    /// Idempotent; returns true if an interest was removed. Empty interest
    /// sets and subscriptions are dropped.
    pub fn unsubscribe(&self, subscriber: &str, token: &str) -> bool {
        let mut removed = false;
        let mut now_empty = false;
        if let Some(mut sub) = self.subscriptions.get_mut(subscriber) {
            removed = sub.tokens.remove(token);
            sub.last_delivery.remove(token);
            now_empty = sub.tokens.is_empty();
        }
        if now_empty {
            self.subscriptions.remove_if(subscriber, |_, sub| sub.tokens.is_empty());
        }

        self.remove_interest(token, subscriber);
        if removed {
            debug!(subscriber, token, "Unsubscribed");
        }
        removed
    }

    fn remove_interest(&self, token: &str, subscriber: &str) {
        let mut now_empty = false;
        if let Some(mut set) = self.interests.get_mut(token) {
            set.remove(subscriber);
            now_empty = set.is_empty();
        }
        if now_empty {
            self.interests.remove_if(token, |_, set| set.is_empty());
        }
    }

    /// Connection closed: forget the subscriber entirely
    pub fn disconnect(&self, subscriber: &str) {
        self.sinks.remove(subscriber);
        if let Some((_, sub)) = self.subscriptions.remove(subscriber) {
            for token in &sub.tokens {
                self.remove_interest(token, subscriber);
            }
            info!(subscriber, tokens = sub.tokens.len(), "Subscriber disconnected");
        }
    }

    /// Push an update to every subscriber interested in its token. Returns how
    /// many queues accepted it.
    pub fn deliver(&self, update: &TokenUpdate) -> usize {
        let subscribers: Vec<SubscriberId> = match self.interests.get(&update.token) {
            Some(set) => set.iter().cloned().collect(),
            None => return 0,
        };

        let stamp = update.state.updated_at;
        let mut accepted = 0;
        let mut closed = Vec::new();

        for subscriber in subscribers {
            let is_new = match self.subscriptions.get_mut(&subscriber) {
                Some(mut sub) => {
                    if sub.last_delivery.get(&update.token) == Some(&stamp) {
                        false
                    } else {
                        sub.last_delivery.insert(update.token.clone(), stamp);
                        true
                    }
                }
                None => false,
            };
            if !is_new {
                self.deduplicated.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let Some(tx) = self.sender(&subscriber) else {
                continue;
            };
            let message = ServerMessage::TokenUpdated {
                token: update.token.clone(),
                state: update.state.clone(),
            };
            match tx.try_send(message) {
                Ok(()) => {
                    accepted += 1;
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(subscriber = %subscriber, token = %update.token, "Subscriber queue full, update dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(subscriber),
            }
        }

        for subscriber in closed {
            self.disconnect(&subscriber);
        }
        accepted
    }

    /// Forward updates from the engine's bus until shutdown
    pub async fn run(self: Arc<Self>, mut updates: broadcast::Receiver<TokenUpdate>, mut shutdown: broadcast::Receiver<()>) {
        info!("📡 Realtime hub started");
        loop {
            tokio::select! {
                received = updates.recv() => match received {
                    Ok(update) => {
                        self.deliver(&update);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Realtime hub lagged behind update bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Update bus closed, stopping realtime hub");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    info!("🛑 Realtime hub shutting down");
                    break;
                }
            }
        }
    }

    pub fn subscriber_count(&self, token: &str) -> usize {
        self.interests.get(token).map(|s| s.len()).unwrap_or(0)
    }

    pub fn has_subscription(&self, subscriber: &str) -> bool {
        self.subscriptions.contains_key(subscriber)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            tokens: self.interests.len(),
            subscriptions: self.subscriptions.len(),
            connections: self.sinks.len(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RiskLevel, RiskRecord, TokenSnapshot, TokenState, VelocityRecord};

    fn update(token: &str, updated_at: DateTime<Utc>) -> TokenUpdate {
        TokenUpdate::new(TokenState {
            snapshot: TokenSnapshot::empty(token),
            velocity: VelocityRecord::default(),
            risk: RiskRecord {
                token: token.to_string(),
                rule_risk_score: 0.0,
                rule_risk_level: RiskLevel::Minimal,
                ml_probability: None,
                ml_confidence: None,
                ml_time_to_rug_secs: None,
                top_risk_factors: vec![],
                hybrid_risk_score: 0.0,
                hybrid_risk_level: RiskLevel::Minimal,
            },
            protection: None,
            refreshed: true,
            throttled: false,
            updated_at,
        })
    }

    #[test]
    fn test_double_subscribe_delivers_once() {
        let hub = RealtimeHub::new(8);
        let mut rx = hub.attach("sub-1");
        assert!(hub.subscribe("sub-1", "mint-a"));
        assert!(!hub.subscribe("sub-1", "mint-a"));

        assert_eq!(hub.deliver(&update("mint-a", Utc::now())), 1);
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::TokenUpdated { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_only_interested_subscribers_receive() {
        let hub = RealtimeHub::new(8);
        let mut a = hub.attach("a");
        let mut b = hub.attach("b");
        hub.subscribe("a", "mint-a");
        hub.subscribe("b", "mint-b");

        hub.deliver(&update("mint-a", Utc::now()));
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_same_stamp_not_redelivered() {
        let hub = RealtimeHub::new(8);
        let mut rx = hub.attach("a");
        hub.subscribe("a", "mint-a");
        let stamp = Utc::now();

        assert_eq!(hub.deliver(&update("mint-a", stamp)), 1);
        assert_eq!(hub.deliver(&update("mint-a", stamp)), 0);
        assert_eq!(hub.deliver(&update("mint-a", stamp + chrono::Duration::seconds(1))), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.stats().deduplicated, 1);
    }

    #[test]
    fn test_last_unsubscribe_removes_entries() {
        let hub = RealtimeHub::new(8);
        let _rx = hub.attach("a");
        hub.subscribe("a", "mint-a");
        hub.subscribe("a", "mint-b");

        assert!(hub.unsubscribe("a", "mint-a"));
        assert!(!hub.unsubscribe("a", "mint-a"));
        assert_eq!(hub.subscriber_count("mint-a"), 0);
        assert_eq!(hub.stats().tokens, 1);
        assert!(hub.has_subscription("a"));

        hub.unsubscribe("a", "mint-b");
        assert_eq!(hub.stats().tokens, 0);
        assert!(!hub.has_subscription("a"));
        // connection stays open for later subscribes
        assert_eq!(hub.stats().connections, 1);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let hub = RealtimeHub::new(1);
        let _rx = hub.attach("slow");
        hub.subscribe("slow", "mint-a");
        let now = Utc::now();

        assert_eq!(hub.deliver(&update("mint-a", now)), 1);
        assert_eq!(hub.deliver(&update("mint-a", now + chrono::Duration::seconds(1))), 0);
        assert_eq!(hub.stats().dropped, 1);
    }

    #[test]
    fn test_closed_receiver_disconnects_subscriber() {
        let hub = RealtimeHub::new(4);
        let rx = hub.attach("gone");
        hub.subscribe("gone", "mint-a");
        drop(rx);

        assert_eq!(hub.deliver(&update("mint-a", Utc::now())), 0);
        assert_eq!(hub.subscriber_count("mint-a"), 0);
        assert_eq!(hub.stats().connections, 0);
    }

    #[tokio::test]
    async fn test_run_forwards_bus_updates() {
        let hub = Arc::new(RealtimeHub::new(4));
        let mut rx = hub.attach("a");
        hub.subscribe("a", "mint-a");

        let bus = crate::transport::UpdateBus::new(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(hub.clone().run(bus.subscribe(), shutdown_rx));

        bus.publish(update("mint-a", Utc::now()));
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::TokenUpdated { ref token, .. } if token == "mint-a"));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
