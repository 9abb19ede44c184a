//! Authenticated game control commands. A validated command is stripped of
//! its token and published on the game's control channel, where the
//! scheduler picks it up.

use super::emit_error;
use crate::context::AppContext;
use protocol::Channel;
use serde_json::Value;
use std::sync::Arc;

pub(super) async fn handle_control(context: &Arc<AppContext>, sid: &str, payload: Value) {
    let token = payload
        .get("token")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !context.auth.validate(token) {
        tracing::warn!(sid, "control command with invalid token");
        emit_error(context, sid, "Unauthorized").await;
        return;
    }

    let Some(game_id) = payload.get(protocol::GAME_ID_FIELD).and_then(Value::as_str) else {
        tracing::warn!(sid, "control command without game_id survived validation");
        return;
    };

    if !context.registry.has(game_id).await {
        emit_error(context, sid, "Game not found or not running").await;
        return;
    }

    let mut message = payload.clone();
    if let Some(map) = message.as_object_mut() {
        map.remove("token");
    }

    match context
        .broker
        .publish(game_id, Channel::Controls, message)
        .await
    {
        Ok(delivered) => {
            tracing::debug!(sid, game_id, delivered, "control command published");
        }
        Err(error) => {
            tracing::error!(sid, game_id, %error, "failed to publish control command");
        }
    }
}
