//! Handlers behind the route table.

mod controls;
mod join;

pub use join::relay_processor;

use crate::context::AppContext;
use crate::router::RouteHandler;
use protocol::GameEvent;
use serde_json::{Value, json};
use std::sync::Arc;

/// Invokes the handler a route resolved to. Handler failures never
/// propagate; whatever the sender needs to know was already emitted.
pub async fn handle(context: &Arc<AppContext>, handler: RouteHandler, sid: &str, payload: Value) {
    match handler {
        RouteHandler::ControlStart
        | RouteHandler::ControlPause
        | RouteHandler::ControlResume
        | RouteHandler::ControlSpeed => controls::handle_control(context, sid, payload).await,
        RouteHandler::JoinGame => join::handle_join(context, sid, payload).await,
    }
}

/// Sends a `game.error` with the given text to one session.
pub(crate) async fn emit_error(context: &AppContext, sid: &str, message: &str) {
    let report = json!({ "error": message });
    if let Err(error) = context.transport.emit(GameEvent::Error, report, sid).await {
        tracing::warn!(sid, %error, "failed to deliver error report");
    }
}
