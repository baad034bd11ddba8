use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Role, Viewer};

// -- JWT Claims --

/// JWT claims shared across qvault-api (REST middleware) and qvault-gateway
/// (WebSocket authentication). Tokens are minted by the portal's identity
/// provider; this side only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub school: Option<String>,
    pub exp: usize,
}

impl From<Claims> for Viewer {
    fn from(claims: Claims) -> Self {
        let display_name = claims
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| match claims.role {
                Role::Student => "Student".to_string(),
                Role::Teacher => "Teacher".to_string(),
            });

        Viewer {
            id: claims.sub,
            role: claims.role,
            display_name,
            school: claims.school,
        }
    }
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadResponse {
    pub counterpart_id: Uuid,
    pub unread_count: u32,
}

/// Error body. `content` echoes an unsent message back so the caller can retry.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}
