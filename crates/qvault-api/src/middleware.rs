use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::warn;

use qvault_chat::IdentityProvider;
use qvault_types::api::Claims;
use qvault_types::models::Viewer;

use crate::AppState;

/// The identity attached to a request. `None` when no bearer token was sent.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Option<Viewer>);

impl IdentityProvider for CurrentUser {
    fn current_user(&self) -> Option<Viewer> {
        self.0.clone()
    }
}

pub fn verify_token(token: &str, secret: &str) -> Option<Viewer> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| Viewer::from(data.claims))
}

/// Resolve the bearer JWT into a [`CurrentUser`]. A missing header yields an
/// anonymous request; a malformed or invalid token is rejected.
pub async fn resolve_identity(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let viewer = match req.headers().get(header::AUTHORIZATION) {
        None => None,
        Some(value) => {
            let token = value
                .to_str()
                .ok()
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or(StatusCode::UNAUTHORIZED)?;
            Some(verify_token(token, &state.jwt_secret).ok_or(StatusCode::UNAUTHORIZED)?)
        }
    };

    if let Some(viewer) = &viewer {
        if let Err(e) = state.chat.sync_profile(viewer).await {
            warn!("Could not record profile for {}: {}", viewer.id, e);
        }
    }

    req.extensions_mut().insert(CurrentUser(viewer));
    Ok(next.run(req).await)
}
