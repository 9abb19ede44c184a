//! Networked broker on top of Redis pub/sub.
//!
//! A `(game_id, channel)` pair maps onto the Redis channel
//! `game:<game_id>:<channel>`. Payloads travel as JSON text; the shutdown
//! sentinel is a JSON envelope recognized on the receive path.

use crate::error::BrokerError;
use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use protocol::Channel;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Msg};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

fn full_channel(game_id: &str, channel: Channel) -> String {
    format!("game:{game_id}:{channel}")
}

pub struct RedisBroker {
    client: Client,
    /// Shared command connection, established lazily.
    conn: tokio::sync::Mutex<Option<ConnectionManager>>,
    /// Channel names of every open subscription, so shutdown can reach them.
    active: Arc<Mutex<HashMap<u64, Vec<String>>>>,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

impl RedisBroker {
    pub fn new(url: &str) -> Result<Self, BrokerError> {
        let client = Client::open(url)?;
        tracing::debug!(url, "redis broker initialized");
        Ok(RedisBroker {
            client,
            conn: tokio::sync::Mutex::new(None),
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    async fn connection(&self) -> Result<ConnectionManager, BrokerError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|error| {
                tracing::error!(%error, "error connecting to redis in broker");
                error
            })?;
        tracing::info!("broker connected to redis");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    pub async fn publish(
        &self,
        game_id: &str,
        channel: Channel,
        message: &Value,
    ) -> Result<usize, BrokerError> {
        if self.is_shutting_down() {
            tracing::warn!(game_id, "publish ignored: broker is shutting down");
            return Ok(0);
        }
        let payload = serde_json::to_string(message)?;
        let mut conn = self.connection().await?;
        let delivered: i64 = conn
            .publish(full_channel(game_id, channel), payload)
            .await
            .map_err(|error| {
                tracing::error!(game_id, channel = %channel, %error, "broker failed to publish message");
                error
            })?;
        Ok(delivered.max(0) as usize)
    }

    /// Best-effort broadcast: publishes once to the pattern name
    /// `game:*:<channel>`. Only pattern subscribers on the external side
    /// receive it, and the returned count is theirs, not a delivery
    /// guarantee.
    pub async fn broadcast(&self, channel: Channel, message: &Value) -> Result<usize, BrokerError> {
        if self.is_shutting_down() {
            return Ok(0);
        }
        let payload = serde_json::to_string(message)?;
        let mut conn = self.connection().await?;
        let delivered: i64 = conn.publish(format!("game:*:{channel}"), payload).await?;
        Ok(delivered.max(0) as usize)
    }

    pub(crate) async fn subscribe(
        &self,
        game_id: &str,
        channels: &[Channel],
    ) -> Result<RedisSubscription, BrokerError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let mut names = Vec::with_capacity(channels.len());
        for channel in channels {
            let name = full_channel(game_id, *channel);
            pubsub.subscribe(&name).await?;
            names.push(name);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active.lock().insert(id, names.clone());
        tracing::info!(game_id, channels = ?names, "subscribed to broker channels");

        Ok(RedisSubscription {
            stream: Box::pin(pubsub.into_on_message()),
            _guard: ActiveGuard {
                active: self.active.clone(),
                id,
            },
            finished: false,
        })
    }

    /// Publishes the sentinel envelope to every channel with an open
    /// subscription, then forgets them. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("redis broker shutdown initiated");

        let channels: HashSet<String> = self
            .active
            .lock()
            .drain()
            .flat_map(|(_, names)| names)
            .collect();
        if channels.is_empty() {
            tracing::info!("redis broker shutdown completed");
            return;
        }

        let sentinel = protocol::sentinel_envelope().to_string();
        match self.connection().await {
            Ok(mut conn) => {
                for name in channels {
                    if let Err(error) = conn.publish::<_, _, i64>(&name, &sentinel).await {
                        tracing::warn!(channel = %name, %error, "failed to publish shutdown sentinel");
                    }
                }
            }
            Err(error) => {
                tracing::error!(%error, "cannot reach redis to deliver shutdown sentinels");
            }
        }
        tracing::info!("redis broker shutdown completed");
    }
}

pub(crate) struct RedisSubscription {
    stream: Pin<Box<dyn Stream<Item = Msg> + Send>>,
    _guard: ActiveGuard,
    finished: bool,
}

impl RedisSubscription {
    pub(crate) async fn next(&mut self) -> Option<Value> {
        if self.finished {
            return None;
        }
        while let Some(msg) = self.stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(error) => {
                    tracing::warn!(%error, "undecodable payload on broker channel");
                    continue;
                }
            };
            match serde_json::from_str::<Value>(&payload) {
                Ok(message) if protocol::is_sentinel(&message) => {
                    self.finished = true;
                    return None;
                }
                Ok(message) => return Some(message),
                Err(error) => {
                    tracing::warn!(%error, "invalid JSON received on broker channel");
                }
            }
        }
        self.finished = true;
        None
    }
}

/// Forgets the subscription's channel names when the stream goes away. The
/// pub/sub connection itself closes with the stream.
struct ActiveGuard {
    active: Arc<Mutex<HashMap<u64, Vec<String>>>>,
    id: u64,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_are_game_scoped() {
        assert_eq!(full_channel("g1", Channel::Controls), "game:g1:controls");
        assert_eq!(
            full_channel("match-7", Channel::ScoresUpdate),
            "game:match-7:scores_update"
        );
    }

    #[test]
    fn bad_url_is_rejected() {
        assert!(RedisBroker::new("not a url").is_err());
    }
}
