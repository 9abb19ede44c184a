//! Validates inbound client messages and routes them to their handlers.

use crate::context::AppContext;
use crate::error::MessageError;
use crate::handlers;
use protocol::GameEvent;
use serde_json::{Value, json};
use std::sync::Arc;

/// The namespace game traffic arrives on.
pub const GAME_NAMESPACE: &str = "/game";

/// Runs one message through the validation chain and, if it survives,
/// invokes its handler with the `namespace`-augmented payload.
pub async fn dispatch(
    context: &Arc<AppContext>,
    sid: &str,
    data: &Value,
    namespace: &str,
) -> Result<(), MessageError> {
    let raw_type = data.get(protocol::TYPE_FIELD).and_then(Value::as_str);
    let raw_type = match raw_type {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(MessageError("event type missing.".to_string())),
    };

    let event: GameEvent = raw_type
        .parse()
        .map_err(|_| MessageError(format!("Unknown event type: {raw_type}")))?;

    let route = context
        .router
        .get_definition(event)
        .ok_or_else(|| MessageError(format!("Unknown event type: {event}")))?;

    let mut payload = match route.schema {
        Some(schema) => schema.validate(event, data)?,
        None => data.clone(),
    };
    if let Some(map) = payload.as_object_mut() {
        map.insert("namespace".to_string(), json!(namespace));
    }

    handlers::handle(context, route.handler, sid, payload).await;
    Ok(())
}
