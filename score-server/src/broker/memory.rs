//! In-process broker backed by bounded queues.
//!
//! Subscribers live in a nested map `game_id -> channel -> queues`. Fan-out
//! is non-blocking: a full queue costs that subscriber the message, never
//! the publisher.

use super::QueueItem;
use parking_lot::Mutex;
use protocol::Channel;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Capacity of one subscriber queue.
pub(crate) const QUEUE_CAPACITY: usize = 100;

type ChannelMap = HashMap<Channel, HashMap<u64, mpsc::Sender<QueueItem>>>;

#[derive(Default)]
struct SubscriberTree {
    games: HashMap<String, ChannelMap>,
    next_id: u64,
}

pub struct MemoryBroker {
    tree: Arc<Mutex<SubscriberTree>>,
    shutdown: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        tracing::debug!("in-memory broker initialized");
        MemoryBroker {
            tree: Arc::new(Mutex::new(SubscriberTree::default())),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Posts `message` to every queue under `(game_id, channel)`; returns the
    /// number of queues reached. Full or closed queues are logged and
    /// subtracted from the count.
    pub fn publish(&self, game_id: &str, channel: Channel, message: &Value) -> usize {
        if self.is_shutting_down() {
            tracing::warn!(game_id, "publish ignored: broker is shutting down");
            return 0;
        }

        // Snapshot the queue set so concurrent unsubscribes cannot invalidate
        // the iteration.
        let subscribers: Vec<(u64, mpsc::Sender<QueueItem>)> = {
            let tree = self.tree.lock();
            match tree.games.get(game_id).and_then(|game| game.get(&channel)) {
                Some(queues) => queues.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (subscriber, tx) in subscribers {
            match tx.try_send(QueueItem::Message(message.clone())) {
                Ok(()) => delivered += 1,
                Err(error) => {
                    tracing::error!(
                        game_id,
                        channel = %channel,
                        subscriber,
                        %error,
                        "failed to enqueue message for subscriber"
                    );
                }
            }
        }
        delivered
    }

    /// Posts `message` to every subscriber of `channel` across all games.
    pub fn broadcast(&self, channel: Channel, message: &Value) -> usize {
        if self.is_shutting_down() {
            return 0;
        }

        let subscribers: Vec<(u64, mpsc::Sender<QueueItem>)> = {
            let tree = self.tree.lock();
            tree.games
                .values()
                .filter_map(|game| game.get(&channel))
                .flat_map(|queues| queues.iter().map(|(id, tx)| (*id, tx.clone())))
                .collect()
        };

        let mut delivered = 0;
        for (subscriber, tx) in subscribers {
            match tx.try_send(QueueItem::Message(message.clone())) {
                Ok(()) => delivered += 1,
                Err(error) => {
                    tracing::error!(
                        channel = %channel,
                        subscriber,
                        %error,
                        "failed to enqueue broadcast for subscriber"
                    );
                }
            }
        }
        delivered
    }

    /// Adds one fresh queue to each of the requested channels.
    pub(crate) fn subscribe(&self, game_id: &str, channels: &[Channel]) -> MemorySubscription {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

        let id = {
            let mut tree = self.tree.lock();
            let id = tree.next_id;
            tree.next_id += 1;
            let game = tree.games.entry(game_id.to_string()).or_default();
            for channel in channels {
                game.entry(*channel).or_default().insert(id, tx.clone());
            }
            id
        };
        tracing::info!(game_id, ?channels, subscriber = id, "broker subscription opened");

        MemorySubscription {
            rx,
            guard: Some(SubscriberGuard {
                tree: self.tree.clone(),
                game_id: game_id.to_string(),
                channels: channels.to_vec(),
                id,
            }),
            finished: false,
        }
    }

    /// Wakes every outstanding subscriber with a sentinel and clears the
    /// subscriber registry. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("in-memory broker shutdown initiated");

        // One sentinel per queue, even when the queue joined several channels.
        let queues: Vec<mpsc::Sender<QueueItem>> = {
            let mut tree = self.tree.lock();
            let mut unique: HashMap<u64, mpsc::Sender<QueueItem>> = HashMap::new();
            for game in tree.games.values() {
                for queues in game.values() {
                    for (id, tx) in queues {
                        unique.entry(*id).or_insert_with(|| tx.clone());
                    }
                }
            }
            tree.games.clear();
            unique.into_values().collect()
        };

        for tx in queues {
            // An awaited send so even a full queue gets its wake-up; a closed
            // queue means the consumer is already gone.
            let _ = tx.send(QueueItem::Sentinel).await;
        }
        tracing::info!("in-memory broker shutdown completed");
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, game_id: &str, channel: Channel) -> usize {
        self.tree
            .lock()
            .games
            .get(game_id)
            .and_then(|game| game.get(&channel))
            .map(|queues| queues.len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn has_game(&self, game_id: &str) -> bool {
        self.tree.lock().games.contains_key(game_id)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct MemorySubscription {
    rx: mpsc::Receiver<QueueItem>,
    guard: Option<SubscriberGuard>,
    finished: bool,
}

impl MemorySubscription {
    pub(crate) async fn next(&mut self) -> Option<Value> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(QueueItem::Message(message)) => Some(message),
            Some(QueueItem::Sentinel) | None => {
                self.finished = true;
                // Release the queue now instead of waiting for the drop.
                self.guard.take();
                None
            }
        }
    }
}

/// Removes the subscriber's queue from every channel it joined, pruning
/// empty channel and game entries on the way out.
pub(crate) struct SubscriberGuard {
    tree: Arc<Mutex<SubscriberTree>>,
    game_id: String,
    channels: Vec<Channel>,
    id: u64,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let mut tree = self.tree.lock();
        let Some(game) = tree.games.get_mut(&self.game_id) else {
            return;
        };
        for channel in &self.channels {
            if let Some(queues) = game.get_mut(channel) {
                queues.remove(&self.id);
                if queues.is_empty() {
                    game.remove(channel);
                }
            }
        }
        if game.is_empty() {
            tree.games.remove(&self.game_id);
        }
        tracing::debug!(
            game_id = %self.game_id,
            subscriber = self.id,
            "broker subscription released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MessageBroker;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_subscriber_in_order() {
        let broker = MessageBroker::in_memory();
        let mut sub = broker
            .subscribe("game1", &[Channel::ScoresUpdate])
            .await
            .expect("subscribe");

        for i in 0..5 {
            let delivered = broker
                .publish("game1", Channel::ScoresUpdate, json!({"seq": i}))
                .await
                .expect("publish");
            assert_eq!(delivered, 1);
        }
        for i in 0..5 {
            assert_eq!(sub.next().await, Some(json!({"seq": i})));
        }
    }

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let broker = MessageBroker::in_memory();
        let mut subs = Vec::new();
        for _ in 0..3 {
            subs.push(
                broker
                    .subscribe("gameX", &[Channel::ScoresUpdate])
                    .await
                    .expect("subscribe"),
            );
        }

        let delivered = broker
            .publish("gameX", Channel::ScoresUpdate, json!({"msg": "multi"}))
            .await
            .expect("publish");
        assert_eq!(delivered, 3);
        for sub in &mut subs {
            assert_eq!(sub.next().await, Some(json!({"msg": "multi"})));
        }
    }

    #[tokio::test]
    async fn games_and_channels_are_isolated() {
        let broker = MessageBroker::in_memory();
        let mut g1_scores = broker
            .subscribe("g1", &[Channel::ScoresUpdate])
            .await
            .expect("subscribe");
        let mut g2_scores = broker
            .subscribe("g2", &[Channel::ScoresUpdate])
            .await
            .expect("subscribe");
        let mut g1_controls = broker
            .subscribe("g1", &[Channel::Controls])
            .await
            .expect("subscribe");

        let delivered = broker
            .publish("g1", Channel::ScoresUpdate, json!({"only": "g1"}))
            .await
            .expect("publish");
        assert_eq!(delivered, 1);
        assert_eq!(g1_scores.next().await, Some(json!({"only": "g1"})));

        // Neither the other game nor the other channel saw anything.
        broker.shutdown().await;
        assert_eq!(g2_scores.next().await, None);
        assert_eq!(g1_controls.next().await, None);
    }

    #[tokio::test]
    async fn publish_without_subscribers_delivers_nothing() {
        let broker = MessageBroker::in_memory();
        let delivered = broker
            .publish("nobody", Channel::ScoresUpdate, json!({}))
            .await
            .expect("publish");
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn full_queue_is_subtracted_from_the_count() {
        let broker = MemoryBroker::new();
        let _sub = broker.subscribe("g", &[Channel::ScoresUpdate]);

        for _ in 0..QUEUE_CAPACITY {
            assert_eq!(broker.publish("g", Channel::ScoresUpdate, &json!({})), 1);
        }
        // The subscriber never drained, so the next enqueue fails.
        assert_eq!(broker.publish("g", Channel::ScoresUpdate, &json!({})), 0);
    }

    #[tokio::test]
    async fn empty_channel_set_terminates_immediately() {
        let broker = MessageBroker::in_memory();
        let mut sub = broker.subscribe("g", &[]).await.expect("subscribe");
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn dropping_a_subscription_prunes_the_tree() {
        let broker = MemoryBroker::new();
        let sub = broker.subscribe("g", &[Channel::ScoresUpdate, Channel::Controls]);
        assert_eq!(broker.subscriber_count("g", Channel::ScoresUpdate), 1);
        assert_eq!(broker.subscriber_count("g", Channel::Controls), 1);

        drop(sub);
        assert!(!broker.has_game("g"));
    }

    #[tokio::test]
    async fn shutdown_wakes_subscribers_and_rejects_publishes() {
        let broker = MessageBroker::in_memory();
        let mut sub = broker
            .subscribe("g", &[Channel::ScoresUpdate])
            .await
            .expect("subscribe");

        let consumer = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(message) = sub.next().await {
                received.push(message);
            }
            received
        });

        broker.shutdown().await;
        // Idempotent.
        broker.shutdown().await;

        let received = consumer.await.expect("consumer");
        assert!(received.is_empty());

        let delivered = broker
            .publish("g", Channel::ScoresUpdate, json!({}))
            .await
            .expect("publish");
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn subscribe_after_shutdown_yields_a_closed_stream() {
        let broker = MessageBroker::in_memory();
        broker.shutdown().await;
        let mut sub = broker
            .subscribe("g", &[Channel::ScoresUpdate])
            .await
            .expect("subscribe");
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn broadcast_crosses_games_but_not_channels() {
        let broker = MessageBroker::in_memory();
        let mut g1 = broker
            .subscribe("g1", &[Channel::Controls])
            .await
            .expect("subscribe");
        let mut g2 = broker
            .subscribe("g2", &[Channel::Controls])
            .await
            .expect("subscribe");
        let mut scores = broker
            .subscribe("g1", &[Channel::ScoresUpdate])
            .await
            .expect("subscribe");

        let delivered = broker
            .broadcast(Channel::Controls, json!({"all": true}))
            .await
            .expect("broadcast");
        assert_eq!(delivered, 2);
        assert_eq!(g1.next().await, Some(json!({"all": true})));
        assert_eq!(g2.next().await, Some(json!({"all": true})));

        broker.shutdown().await;
        assert_eq!(scores.next().await, None);
    }

    #[tokio::test]
    async fn sentinel_terminates_a_multi_channel_subscription_once() {
        let broker = MemoryBroker::new();
        let mut sub = broker.subscribe("g", &[Channel::ScoresUpdate, Channel::Controls]);
        broker.shutdown().await;
        assert_eq!(sub.next().await, None);
        assert_eq!(sub.next().await, None);
    }
}
