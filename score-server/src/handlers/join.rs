//! Join-game handling: activates the session, wires the broker relay for
//! the game room, puts the client into the room and acknowledges with the
//! game metadata.

use super::emit_error;
use crate::context::AppContext;
use crate::relay::MessageProcessor;
use protocol::GameEvent;
use serde_json::{Map, Value, json};
use std::sync::Arc;

pub(super) async fn handle_join(context: &Arc<AppContext>, sid: &str, payload: Value) {
    let Some(game_id) = payload.get(protocol::GAME_ID_FIELD).and_then(Value::as_str) else {
        tracing::warn!(sid, "join without game_id survived validation");
        return;
    };

    let scheduler = match context.registry.create_or_get(game_id).await {
        Ok(scheduler) => scheduler,
        Err(error) => {
            tracing::warn!(sid, game_id, %error, "join rejected");
            emit_error(
                context,
                sid,
                &format!("Game '{game_id}' is not currently active or does not exist."),
            )
            .await;
            return;
        }
    };

    let channels = context.config.broker.relay_channels();
    if let Err(error) = context
        .relay
        .start_listener(game_id, &channels, game_id, relay_processor(game_id))
        .await
    {
        tracing::error!(sid, game_id, %error, "failed to start broker relay");
        emit_error(context, sid, &format!("Failed to enter game room {game_id}")).await;
        return;
    }

    context.transport.enter_room(sid, game_id).await;
    tracing::info!(sid, game_id, "client entered game room");

    let metadata = match scheduler.metadata().await {
        Ok(Value::Object(metadata)) => metadata,
        Ok(_) | Err(_) => {
            emit_error(context, sid, &format!("Failed to enter game room {game_id}")).await;
            return;
        }
    };
    let mut ack = metadata;
    ack.insert(
        "message".to_string(),
        json!(format!("Successfully joined game {game_id}")),
    );
    if let Err(error) = context
        .transport
        .emit(GameEvent::GameJoin, Value::Object(ack), sid)
        .await
    {
        tracing::error!(sid, game_id, %error, "failed to acknowledge join");
    }
}

/// The processor a join installs on the relay: translates broker envelopes
/// into client events for the game room, or filters them out.
pub fn relay_processor(game_id: &str) -> MessageProcessor {
    let game_id = game_id.to_string();
    Arc::new(move |message: &Value| {
        let event = protocol::event_of(message)?;
        match event {
            GameEvent::GameScoreUpdate => {
                let score = message.get(protocol::DATA_FIELD)?.as_object()?.clone();
                Some((event, client_payload(event, &game_id, score)))
            }
            event if event.is_control() => {
                let mut fields = message.as_object()?.clone();
                fields.remove("token");
                fields.remove(protocol::TYPE_FIELD);
                Some((event, client_payload(event, &game_id, fields)))
            }
            _ => None,
        }
    })
}

/// `{type, game_id}` plus the event's own fields, which win on collision.
fn client_payload(event: GameEvent, game_id: &str, fields: Map<String, Value>) -> Value {
    let mut payload = Map::new();
    payload.insert(protocol::TYPE_FIELD.to_string(), json!(event));
    payload.insert(protocol::GAME_ID_FIELD.to_string(), json!(game_id));
    for (key, value) in fields {
        payload.insert(key, value);
    }
    Value::Object(payload)
}
