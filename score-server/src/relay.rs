//! Bridges broker subscriptions into client rooms.
//!
//! One listener task exists per `(game, channel-set)`, no matter how many
//! clients ask for it. Each broker message is handed to a processor that
//! either turns it into a wire event for the room or discards it.

use crate::broker::MessageBroker;
use crate::error::BrokerError;
use crate::transport::RoomTransport;
use protocol::{Channel, GameEvent};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Turns a broker message into a wire event, or filters it out.
pub type MessageProcessor = Arc<dyn Fn(&Value) -> Option<(GameEvent, Value)> + Send + Sync>;

/// Names one listener: the game id joined with the sorted channel set.
fn subscription_key(game_id: &str, channels: &[Channel]) -> String {
    let mut idents: Vec<&str> = channels.iter().map(Channel::as_str).collect();
    idents.sort_unstable();
    format!("{game_id}:{}", idents.join("+"))
}

pub struct BrokerRelay {
    broker: Arc<MessageBroker>,
    transport: Arc<dyn RoomTransport>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl BrokerRelay {
    pub fn new(broker: Arc<MessageBroker>, transport: Arc<dyn RoomTransport>) -> Arc<Self> {
        Arc::new(BrokerRelay {
            broker,
            transport,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Starts the listener for `(game_id, channels)` unless one is already
    /// running. The lock spans the existence check, the subscription and the
    /// registration, keeping the idempotence check atomic.
    pub async fn start_listener(
        self: &Arc<Self>,
        game_id: &str,
        channels: &[Channel],
        room: &str,
        processor: MessageProcessor,
    ) -> Result<(), BrokerError> {
        let key = subscription_key(game_id, channels);
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&key) {
            tracing::debug!(key, "reusing existing broker relay");
            return Ok(());
        }

        let subscription = self.broker.subscribe(game_id, channels).await?;
        let task = tokio::spawn({
            let relay = self.clone();
            let transport = self.transport.clone();
            let key = key.clone();
            let game_id = game_id.to_string();
            let room = room.to_string();
            async move {
                run_listener(subscription, transport, &game_id, &room, processor).await;
                relay.tasks.lock().await.remove(&key);
                tracing::debug!(key, "broker relay task removed");
            }
        });
        tasks.insert(key.clone(), task);
        tracing::info!(key, "broker relay started");
        Ok(())
    }

    /// Cancels every listener and waits for all of them. Safe during
    /// shutdown and safe to call twice.
    pub async fn stop_all(&self) {
        let tasks: Vec<(String, JoinHandle<()>)> =
            self.tasks.lock().await.drain().collect();
        if tasks.is_empty() {
            return;
        }
        for (_, task) in &tasks {
            task.abort();
        }
        for (key, task) in tasks {
            let _ = task.await;
            tracing::debug!(key, "broker relay stopped");
        }
        tracing::info!("all broker relays stopped");
    }

    /// Number of live listener tasks.
    pub async fn listener_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

async fn run_listener(
    mut subscription: crate::broker::Subscription,
    transport: Arc<dyn RoomTransport>,
    game_id: &str,
    room: &str,
    processor: MessageProcessor,
) {
    while let Some(message) = subscription.next().await {
        if !message.is_object() {
            continue;
        }
        let Some((event, payload)) = processor(&message) else {
            continue;
        };
        if let Err(error) = transport.emit(event, payload, room).await {
            tracing::warn!(game_id, room, %error, "failed to emit relayed message");
        }
    }
    tracing::info!(game_id, room, "broker relay ended");
}
