//! Caller identity, as forwarded by the upstream auth proxy.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use domain::{Actor, Role, UserId};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The authenticated caller of a request.
///
/// Token verification happens upstream; this only reads the trusted headers.
#[derive(Debug, Clone, Copy)]
pub struct CurrentActor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(CurrentActor)
    }
}

fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let user_id = header(USER_ID_HEADER)
        .ok_or_else(|| ApiError::Unauthorized("Missing user identity".to_string()))?
        .parse::<i64>()
        .map_err(|_| ApiError::Unauthorized("Invalid user identity".to_string()))?;

    let role = match header(USER_ROLE_HEADER) {
        Some(role) => role.parse::<Role>().map_err(ApiError::Unauthorized)?,
        None => Role::Buyer,
    };

    Ok(Actor {
        user_id: UserId::new(user_id),
        role,
    })
}
