//! Shared fixtures: a runtime wired onto the in-memory broker, file feeders
//! in a temporary directory and a recording transport instead of sockets.

use score_server::config::Config;
use score_server::context::AppContext;
use score_server::dispatch::{self, GAME_NAMESPACE};
use score_server::transport::testing::RecordingTransport;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestApp {
    pub context: Arc<AppContext>,
    pub transport: Arc<RecordingTransport>,
    // Keeps the game files alive for the duration of the test.
    _dir: TempDir,
}

/// Builds a runtime over the given recorded games, letting the caller tune
/// the configuration before wiring.
pub async fn app_with(games: &[(&str, Value)], tune: impl FnOnce(&mut Config)) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    for (game_id, scores) in games {
        let document = json!({
            "game_id": game_id,
            "teams": ["A", "B"],
            "scores": scores,
        });
        std::fs::write(
            dir.path().join(format!("{game_id}.json")),
            serde_json::to_string(&document).expect("serialize"),
        )
        .expect("write game file");
    }

    let mut config = Config::default();
    config.app.game_data_dir = dir.path().to_path_buf();
    tune(&mut config);

    let transport = Arc::new(RecordingTransport::new());
    let context = AppContext::build(config, transport.clone()).expect("context");
    TestApp {
        context,
        transport,
        _dir: dir,
    }
}

/// Dispatches a join exactly as the socket layer would.
pub async fn join(app: &TestApp, sid: &str, game_id: &str) {
    dispatch::dispatch(
        &app.context,
        sid,
        &json!({"type": "game.join", "game_id": game_id}),
        GAME_NAMESPACE,
    )
    .await
    .expect("join dispatch");
}

/// Dispatches an authenticated control command.
pub async fn control(app: &TestApp, sid: &str, game_id: &str, kind: &str) {
    dispatch::dispatch(
        &app.context,
        sid,
        &json!({"type": kind, "game_id": game_id, "token": "operator"}),
        GAME_NAMESPACE,
    )
    .await
    .expect("control dispatch");
}

/// Score payloads emitted to `room` so far, in emission order.
pub fn score_payloads(transport: &RecordingTransport, room: &str) -> Vec<Value> {
    transport
        .emissions_for(room)
        .into_iter()
        .filter(|record| record.event == protocol::GameEvent::GameScoreUpdate)
        .map(|record| record.payload)
        .collect()
}
