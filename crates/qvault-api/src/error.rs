use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use qvault_chat::ChatError;
use qvault_types::api::ErrorResponse;

/// A [`ChatError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, content) = match &self.0 {
            ChatError::AuthRequired => (StatusCode::UNAUTHORIZED, None),
            ChatError::Validation(_) => (StatusCode::BAD_REQUEST, None),
            ChatError::SendFailed { content, .. } => (StatusCode::BAD_GATEWAY, Some(content.clone())),
            ChatError::Subscription(_) | ChatError::Store(_) => {
                error!("Request failed: {:#}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = ErrorResponse {
            error: self.0.to_string(),
            content,
        };
        (status, Json(body)).into_response()
    }
}
