use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use qvault_chat::{ChatError, IdentityProvider};
use qvault_types::api::{SendMessageRequest, UnreadResponse};
use qvault_types::models::Message;

use crate::AppState;
use crate::error::ApiError;
use crate::middleware::CurrentUser;

/// Open a thread: mark the counterpart's messages read, then return the
/// whole conversation oldest first.
pub async fn open_thread(
    State(state): State<AppState>,
    Path(counterpart_id): Path<Uuid>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let Some(viewer) = user.current_user() else {
        return Ok(Json(Vec::new()));
    };
    Ok(Json(state.chat.open_thread(&viewer, counterpart_id).await?))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(counterpart_id): Path<Uuid>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = user.current_user().ok_or(ChatError::AuthRequired)?;
    let message = state.chat.send(&viewer, counterpart_id, &req.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Path(counterpart_id): Path<Uuid>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<UnreadResponse>, ApiError> {
    let unread_count = match user.current_user() {
        Some(viewer) => state.chat.unread_count(&viewer, counterpart_id).await?,
        None => 0,
    };
    Ok(Json(UnreadResponse {
        counterpart_id,
        unread_count,
    }))
}
