//! In-memory transport double used by the test suites. Records every
//! emission instead of sending it anywhere.

use super::RoomTransport;
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use protocol::GameEvent;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct EmitRecord {
    pub event: GameEvent,
    pub payload: Value,
    pub room: String,
}

#[derive(Default)]
pub struct RecordingTransport {
    emissions: Mutex<Vec<EmitRecord>>,
    memberships: Mutex<HashMap<String, HashSet<String>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        RecordingTransport::default()
    }

    /// Everything emitted so far, in emission order.
    pub fn emissions(&self) -> Vec<EmitRecord> {
        self.emissions.lock().clone()
    }

    /// Everything emitted to one room, in emission order.
    pub fn emissions_for(&self, room: &str) -> Vec<EmitRecord> {
        self.emissions
            .lock()
            .iter()
            .filter(|record| record.room == room)
            .cloned()
            .collect()
    }

    /// Polls until `room` has seen at least `count` emissions or the timeout
    /// elapses, then returns whatever arrived.
    pub async fn wait_for_emissions(
        &self,
        room: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<EmitRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let emissions = self.emissions_for(room);
            if emissions.len() >= count || tokio::time::Instant::now() >= deadline {
                return emissions;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl RoomTransport for RecordingTransport {
    async fn enter_room(&self, sid: &str, room: &str) {
        self.memberships
            .lock()
            .entry(sid.to_string())
            .or_default()
            .insert(room.to_string());
    }

    async fn leave_room(&self, sid: &str, room: &str) {
        if let Some(rooms) = self.memberships.lock().get_mut(sid) {
            rooms.remove(room);
        }
    }

    async fn rooms(&self, sid: &str) -> Vec<String> {
        self.memberships
            .lock()
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
        self.emissions.lock().push(EmitRecord {
            event,
            payload,
            room: room.to_string(),
        });
        Ok(())
    }
}
