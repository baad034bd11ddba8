use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;

use qvault_chat::IdentityProvider;
use qvault_types::models::DirectoryEntry;

use crate::AppState;
use crate::error::ApiError;
use crate::middleware::CurrentUser;

#[derive(Debug, Default, Deserialize)]
pub struct DirectoryQuery {
    /// Case-insensitive filter on display name and affiliation.
    #[serde(default)]
    pub q: Option<String>,
}

pub async fn list_directory(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<DirectoryQuery>,
) -> Result<Json<Vec<DirectoryEntry>>, ApiError> {
    let viewer = user.current_user();
    let directory = state.chat.directory(viewer.as_ref()).await?;

    let entries = match query.q.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => directory.search(q).into_iter().cloned().collect(),
        _ => directory.into_entries(),
    };
    Ok(Json(entries))
}
