//! REST surface for direct messaging.

pub mod directory;
pub mod error;
pub mod messages;
pub mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::get,
};

use qvault_chat::{ChatService, SqliteStore};
use qvault_gateway::Dispatcher;

pub type Chat = ChatService<SqliteStore, Dispatcher>;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub chat: Chat,
    pub jwt_secret: String,
}

/// Routes for directory, threads and unread counts, all behind identity
/// resolution.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/directory", get(directory::list_directory))
        .route(
            "/threads/{counterpart_id}/messages",
            get(messages::open_thread).post(messages::send_message),
        )
        .route("/threads/{counterpart_id}/unread", get(messages::unread_count))
        .layer(from_fn_with_state(state.clone(), middleware::resolve_identity))
        .with_state(state)
}
