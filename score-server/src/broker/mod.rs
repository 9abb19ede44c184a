//! Pub/sub fabric keyed by `(game_id, channel)`.
//!
//! Schedulers publish paced score updates, control handlers publish operator
//! commands, and relays subscribe on behalf of a game room. Two variants
//! exist: an in-process broker backed by bounded queues and a networked one
//! backed by an external Redis instance. Both deliver an in-band sentinel to
//! every outstanding subscriber on shutdown so consumers terminate cleanly.

mod memory;
mod redis;

pub use memory::MemoryBroker;
pub use redis::RedisBroker;

use crate::config::{BrokerKind, Config};
use crate::error::BrokerError;
use protocol::Channel;
use serde_json::Value;

/// One element on an in-process subscriber queue.
#[derive(Debug, Clone)]
pub(crate) enum QueueItem {
    Message(Value),
    Sentinel,
}

/// The configured pub/sub fabric.
pub enum MessageBroker {
    Memory(MemoryBroker),
    Redis(RedisBroker),
}

impl MessageBroker {
    /// Builds the broker named by the configuration.
    pub fn from_config(config: &Config) -> Result<Self, BrokerError> {
        match config.app.message_broker {
            BrokerKind::Memory => Ok(MessageBroker::Memory(MemoryBroker::new())),
            BrokerKind::Redis => Ok(MessageBroker::Redis(RedisBroker::new(
                &config.app.redis_url,
            )?)),
        }
    }

    pub fn in_memory() -> Self {
        MessageBroker::Memory(MemoryBroker::new())
    }

    pub fn is_shutting_down(&self) -> bool {
        match self {
            MessageBroker::Memory(broker) => broker.is_shutting_down(),
            MessageBroker::Redis(broker) => broker.is_shutting_down(),
        }
    }

    /// Delivers `message` to every current subscriber of `(game_id, channel)`
    /// and returns how many were reached. A shutting-down broker delivers to
    /// nobody.
    pub async fn publish(
        &self,
        game_id: &str,
        channel: Channel,
        message: Value,
    ) -> Result<usize, BrokerError> {
        match self {
            MessageBroker::Memory(broker) => Ok(broker.publish(game_id, channel, &message)),
            MessageBroker::Redis(broker) => broker.publish(game_id, channel, &message).await,
        }
    }

    /// Opens a lazy message stream over the named channels of one game. An
    /// empty channel set yields a stream that terminates immediately.
    pub async fn subscribe(
        &self,
        game_id: &str,
        channels: &[Channel],
    ) -> Result<Subscription, BrokerError> {
        if channels.is_empty() || self.is_shutting_down() {
            return Ok(Subscription::empty());
        }
        match self {
            MessageBroker::Memory(broker) => Ok(Subscription {
                inner: SubscriptionInner::Memory(broker.subscribe(game_id, channels)),
            }),
            MessageBroker::Redis(broker) => Ok(Subscription {
                inner: SubscriptionInner::Redis(broker.subscribe(game_id, channels).await?),
            }),
        }
    }

    /// Delivers `message` to every subscriber of `channel` across all games.
    /// Best-effort on the networked variant, where delivery depends on
    /// pattern-subscription support on the external side.
    pub async fn broadcast(&self, channel: Channel, message: Value) -> Result<usize, BrokerError> {
        match self {
            MessageBroker::Memory(broker) => Ok(broker.broadcast(channel, &message)),
            MessageBroker::Redis(broker) => broker.broadcast(channel, &message).await,
        }
    }

    /// Flips the shutting-down flag, wakes every outstanding subscriber with
    /// a sentinel and clears the subscriber registry. Idempotent.
    pub async fn shutdown(&self) {
        match self {
            MessageBroker::Memory(broker) => broker.shutdown().await,
            MessageBroker::Redis(broker) => broker.shutdown().await,
        }
    }
}

/// A live, ordered stream of messages for one `(game_id, channel-set)`.
///
/// The broker-side queue is released when the stream terminates or when the
/// subscription is dropped, whichever comes first.
pub struct Subscription {
    inner: SubscriptionInner,
}

enum SubscriptionInner {
    Empty,
    Memory(memory::MemorySubscription),
    Redis(redis::RedisSubscription),
}

impl Subscription {
    pub(crate) fn empty() -> Self {
        Subscription {
            inner: SubscriptionInner::Empty,
        }
    }

    /// The next message, or `None` once the stream has ended. Sentinels are
    /// filtered out and end the stream.
    pub async fn next(&mut self) -> Option<Value> {
        match &mut self.inner {
            SubscriptionInner::Empty => None,
            SubscriptionInner::Memory(sub) => sub.next().await,
            SubscriptionInner::Redis(sub) => sub.next().await,
        }
    }
}
