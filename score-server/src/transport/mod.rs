//! Delivery of wire events to connected clients.
//!
//! The runtime only ever talks to the [`RoomTransport`] surface: sessions
//! enter and leave named rooms, and emissions address a room (every session
//! implicitly owns a room named after its own id). The WebSocket
//! implementation lives in [`ws`]; the test suites use the in-memory double
//! from [`testing`].

pub mod testing;
mod ws;

pub use ws::{ServerState, WsTransport, websocket_handler};

use crate::error::TransportError;
use async_trait::async_trait;
use protocol::GameEvent;
use serde_json::Value;

#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// Adds a session to a room.
    async fn enter_room(&self, sid: &str, room: &str);

    /// Removes a session from a room.
    async fn leave_room(&self, sid: &str, room: &str);

    /// The rooms a session is currently in, its own-id room included.
    async fn rooms(&self, sid: &str) -> Vec<String>;

    /// Sends one event to every session in `room`. Failures towards a single
    /// session are absorbed by the implementation.
    async fn emit(&self, event: GameEvent, payload: Value, room: &str)
    -> Result<(), TransportError>;
}
