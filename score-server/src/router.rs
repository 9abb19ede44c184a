//! Static route table built at startup: one entry per inbound event type,
//! carrying the handler to invoke and the schema to validate against.
//! Handlers and schemas are tagged variants keyed by the event enumeration.

use crate::error::MessageError;
use protocol::GameEvent;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;

/// The handler side of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteHandler {
    ControlStart,
    ControlPause,
    ControlResume,
    ControlSpeed,
    JoinGame,
}

/// The validation side of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSchema {
    GameControl,
    SpeedControl,
    JoinGame,
}

/// Payload shape of start, pause and resume commands.
#[derive(Debug, Deserialize)]
struct GameControlSchema {
    game_id: String,
    token: String,
    r#type: GameEvent,
}

/// Payload shape of the speed command.
#[derive(Debug, Deserialize)]
struct SpeedControlSchema {
    game_id: String,
    token: String,
    speed: u8,
    r#type: GameEvent,
}

/// Payload shape of the join request.
#[derive(Debug, Deserialize)]
struct JoinGameSchema {
    game_id: String,
    r#type: GameEvent,
}

impl RouteSchema {
    /// Validates `data` for the routed `event` and returns the canonical
    /// payload: the schema fields and nothing else.
    pub fn validate(&self, event: GameEvent, data: &Value) -> Result<Value, MessageError> {
        let invalid = || MessageError("Invalid data schema.".to_string());
        match self {
            RouteSchema::GameControl => {
                let parsed: GameControlSchema =
                    serde_json::from_value(data.clone()).map_err(|_| invalid())?;
                let allowed = matches!(
                    parsed.r#type,
                    GameEvent::GameControlStart
                        | GameEvent::GameControlPause
                        | GameEvent::GameControlResume
                );
                if parsed.r#type != event || !allowed {
                    return Err(invalid());
                }
                Ok(json!({
                    "game_id": parsed.game_id,
                    "token": parsed.token,
                    "type": parsed.r#type,
                }))
            }
            RouteSchema::SpeedControl => {
                let parsed: SpeedControlSchema =
                    serde_json::from_value(data.clone()).map_err(|_| invalid())?;
                if parsed.r#type != event
                    || parsed.r#type != GameEvent::GameControlSpeed
                    || !(1..=7).contains(&parsed.speed)
                {
                    return Err(invalid());
                }
                Ok(json!({
                    "game_id": parsed.game_id,
                    "token": parsed.token,
                    "speed": parsed.speed,
                    "type": parsed.r#type,
                }))
            }
            RouteSchema::JoinGame => {
                let parsed: JoinGameSchema =
                    serde_json::from_value(data.clone()).map_err(|_| invalid())?;
                if parsed.r#type != event || parsed.r#type != GameEvent::GameJoin {
                    return Err(invalid());
                }
                Ok(json!({
                    "game_id": parsed.game_id,
                    "type": parsed.r#type,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RouteDefinition {
    pub handler: RouteHandler,
    pub schema: Option<RouteSchema>,
}

pub struct Router {
    routes: HashMap<GameEvent, RouteDefinition>,
}

impl Router {
    pub fn new() -> Self {
        Router {
            routes: HashMap::new(),
        }
    }

    /// The routes every server instance starts with.
    pub fn with_default_routes() -> Self {
        let mut router = Router::new();
        router.register_route(
            GameEvent::GameControlStart,
            RouteHandler::ControlStart,
            Some(RouteSchema::GameControl),
        );
        router.register_route(
            GameEvent::GameControlPause,
            RouteHandler::ControlPause,
            Some(RouteSchema::GameControl),
        );
        router.register_route(
            GameEvent::GameControlResume,
            RouteHandler::ControlResume,
            Some(RouteSchema::GameControl),
        );
        router.register_route(
            GameEvent::GameControlSpeed,
            RouteHandler::ControlSpeed,
            Some(RouteSchema::SpeedControl),
        );
        router.register_route(
            GameEvent::GameJoin,
            RouteHandler::JoinGame,
            Some(RouteSchema::JoinGame),
        );
        router
    }

    pub fn register_route(
        &mut self,
        event: GameEvent,
        handler: RouteHandler,
        schema: Option<RouteSchema>,
    ) {
        if self.routes.contains_key(&event) {
            tracing::warn!(event = %event, "overwriting route for event type");
        }
        self.routes.insert(event, RouteDefinition { handler, schema });
    }

    pub fn get_definition(&self, event: GameEvent) -> Option<RouteDefinition> {
        let definition = self.routes.get(&event).copied();
        if definition.is_none() {
            tracing::warn!(event = %event, "no route found for event type");
        }
        definition
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::with_default_routes()
    }
}
