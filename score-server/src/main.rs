use axum::Router;
use axum::extract::State;
use axum::routing::get;
use score_server::config::{self, Config};
use score_server::context::AppContext;
use score_server::transport::{ServerState, WsTransport, websocket_handler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
/// Activates tracing, loads the configuration, wires the runtime and serves
/// the WebSocket endpoint plus a small game listing. On shutdown the relays,
/// schedulers and broker are drained in that order.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let config = load_startup_config().await;
    let transport = Arc::new(WsTransport::new());
    let context = match AppContext::build(config, transport.clone()) {
        Ok(context) => context,
        Err(error) => {
            tracing::error!(%error, "failed to build the runtime");
            panic!("failed to build the runtime: {error}");
        }
    };

    let state = ServerState {
        context: context.clone(),
        transport,
    };
    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/games", get(games_handler))
        .with_state(state);

    let bind_addr = context.config.app.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    tracing::info!(bind_addr, "score server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    context.shutdown().await;
    tracing::info!("score server stopped");
}

/// Reads the configuration file named by `SCORECAST_CONFIG`, or
/// `scorecast.json` in the working directory. An explicitly named file must
/// load; the implicit one may be absent, in which case defaults apply.
async fn load_startup_config() -> Config {
    match std::env::var("SCORECAST_CONFIG") {
        Ok(path) => {
            let path = PathBuf::from(path);
            match config::load_config(&path).await {
                Ok(config) => config,
                Err(error) => {
                    tracing::error!(%error, "initial configuration load failed");
                    panic!("initial configuration load failed: {error}");
                }
            }
        }
        Err(_) => {
            let path = PathBuf::from("scorecast.json");
            match config::load_config(&path).await {
                Ok(config) => config,
                Err(error) => {
                    tracing::info!(%error, "no configuration file; using defaults");
                    Config::default()
                }
            }
        }
    }
}

/// Lists the active game sessions and their scheduler states.
async fn games_handler(State(state): State<ServerState>) -> String {
    let mut games = state.context.registry.active_games().await;
    games.sort_by(|a, b| a.0.cmp(&b.0));
    games
        .iter()
        .map(|(game_id, scheduler_state)| {
            format!("Game: {:<30} State: {}", game_id, scheduler_state)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
