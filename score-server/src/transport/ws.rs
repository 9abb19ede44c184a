//! WebSocket transport on axum.
//!
//! Each connection gets a session id and an outbound queue. Inbound text
//! frames are parsed as JSON and handed to the dispatcher; outbound
//! emissions fan out over the room registry. By splitting the socket, the
//! two directions run as separate tasks and either one ending tears the
//! connection down.

use super::RoomTransport;
use crate::context::AppContext;
use crate::dispatch;
use crate::error::{MessageError, TransportError};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use protocol::GameEvent;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Buffer size of one client's outbound frame queue.
const OUTBOX_CAPACITY: usize = 256;

/// Shared state behind the axum routes.
#[derive(Clone)]
pub struct ServerState {
    pub context: Arc<AppContext>,
    pub transport: Arc<WsTransport>,
}

#[derive(Default)]
struct RoomState {
    /// room -> member session ids
    rooms: HashMap<String, HashSet<String>>,
    /// session id -> rooms it joined (its own-id room included)
    memberships: HashMap<String, HashSet<String>>,
    /// session id -> outbound frame queue
    outboxes: HashMap<String, mpsc::Sender<String>>,
}

#[derive(Default)]
pub struct WsTransport {
    state: Mutex<RoomState>,
    next_sid: AtomicU64,
}

impl WsTransport {
    pub fn new() -> Self {
        WsTransport::default()
    }

    /// Registers a fresh connection: assigns its session id, opens its
    /// outbound queue and puts it into its own-id room.
    pub fn register_connection(&self) -> (String, mpsc::Receiver<String>) {
        let sid = format!("sid-{}", self.next_sid.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);

        let mut state = self.state.lock();
        state.outboxes.insert(sid.clone(), tx);
        state
            .rooms
            .entry(sid.clone())
            .or_default()
            .insert(sid.clone());
        state
            .memberships
            .entry(sid.clone())
            .or_default()
            .insert(sid.clone());
        (sid, rx)
    }

    /// Removes the session from every room it was in and closes its queue.
    pub fn unregister_connection(&self, sid: &str) {
        let mut state = self.state.lock();
        if let Some(rooms) = state.memberships.remove(sid) {
            for room in rooms {
                if let Some(members) = state.rooms.get_mut(&room) {
                    members.remove(sid);
                    if members.is_empty() {
                        state.rooms.remove(&room);
                    }
                }
            }
        }
        state.outboxes.remove(sid);
    }

    #[cfg(test)]
    pub(crate) fn room_members(&self, room: &str) -> Vec<String> {
        self.state
            .lock()
            .rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RoomTransport for WsTransport {
    async fn enter_room(&self, sid: &str, room: &str) {
        let mut state = self.state.lock();
        state
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(sid.to_string());
        state
            .memberships
            .entry(sid.to_string())
            .or_default()
            .insert(room.to_string());
    }

    async fn leave_room(&self, sid: &str, room: &str) {
        let mut state = self.state.lock();
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(sid);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
        if let Some(rooms) = state.memberships.get_mut(sid) {
            rooms.remove(room);
        }
    }

    async fn rooms(&self, sid: &str) -> Vec<String> {
        self.state
            .lock()
            .memberships
            .get(sid)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn emit(
        &self,
        event: GameEvent,
        payload: Value,
        room: &str,
    ) -> Result<(), TransportError> {
        let frame = protocol::client_frame(event, payload).to_string();
        let targets: Vec<(String, mpsc::Sender<String>)> = {
            let state = self.state.lock();
            match state.rooms.get(room) {
                Some(members) => members
                    .iter()
                    .filter_map(|sid| {
                        state
                            .outboxes
                            .get(sid)
                            .map(|tx| (sid.clone(), tx.clone()))
                    })
                    .collect(),
                None => return Ok(()),
            }
        };

        for (sid, tx) in targets {
            // A full or closed queue costs that client the frame only.
            if let Err(error) = tx.try_send(frame.clone()) {
                tracing::warn!(sid, room, %error, "dropping frame for unreachable client");
            }
        }
        Ok(())
    }
}

/// Upgrades the HTTP request to a WebSocket and hands it off.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket(socket, state))
}

/// Handles one connection from registration to disconnect sweep.
async fn websocket(stream: WebSocket, state: ServerState) {
    // By splitting, we can send and receive at the same time.
    let (sender, receiver) = stream.split();
    let (sid, outbox) = state.transport.register_connection();
    tracing::info!(sid, "client connected");

    let mut send_task = tokio::spawn(send_loop(sender, outbox));
    let mut receive_task = tokio::spawn(receive_loop(
        receiver,
        state.context.clone(),
        sid.clone(),
    ));

    // If any one of the tasks runs to completion, we abort the other.
    tokio::select! {
        _ = &mut send_task => receive_task.abort(),
        _ = &mut receive_task => send_task.abort(),
    }

    state.transport.unregister_connection(&sid);
    tracing::info!(sid, "client disconnected");
}

/// Drains the session's outbound queue into the socket.
async fn send_loop(mut sender: SplitSink<WebSocket, Message>, mut outbox: mpsc::Receiver<String>) {
    while let Some(frame) = outbox.recv().await {
        if sender.send(Message::Text(frame.into())).await.is_err() {
            break;
        }
    }
}

/// Feeds inbound frames to the dispatcher until the socket closes.
async fn receive_loop(
    mut receiver: SplitStream<WebSocket>,
    context: Arc<AppContext>,
    sid: String,
) {
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::Null);
                handle_incoming(&context, &sid, data).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // Ping/pong handled by axum.
            Err(_) => break,
        }
    }
}

/// Validates and dispatches one inbound message, reporting rejections back
/// to the sender as `game.error`.
pub(crate) async fn handle_incoming(context: &Arc<AppContext>, sid: &str, data: Value) {
    tracing::debug!(sid, "received message");
    let result = if data.is_object() {
        dispatch::dispatch(context, sid, &data, dispatch::GAME_NAMESPACE).await
    } else {
        Err(MessageError("Data must be of type dict.".to_string()))
    };

    if let Err(MessageError(message)) = result {
        tracing::warn!(sid, error = %message, "message rejected");
        let report = json!({ "error": message });
        if let Err(error) = context.transport.emit(GameEvent::Error, report, sid).await {
            tracing::warn!(sid, %error, "failed to report message error");
        }
    }
}
