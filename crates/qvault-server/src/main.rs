mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use qvault_api::{AppState, AppStateInner, Chat};
use qvault_chat::{ChatService, SqliteStore};
use qvault_gateway::{Dispatcher, connection};

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    chat: Chat,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qvault=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(qvault_db::Database::open(&config.db_path)?);

    // Shared state
    let dispatcher = Dispatcher::new(config.subscriber_capacity);
    let chat = ChatService::new(SqliteStore::new(db), dispatcher, config.reconnect);
    let app_state: AppState = Arc::new(AppStateInner {
        chat: chat.clone(),
        jwt_secret: config.jwt_secret.clone(),
    });

    let state = ServerState {
        chat,
        jwt_secret: config.jwt_secret.clone(),
    };

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(qvault_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Q'Vault messaging listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.chat, state.jwt_secret))
}
