//! Bearer-token extraction for the HTTP routes.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::AppState;

use super::Credentials;

/// Claimed user id; required by the development verifier, cross-checked
/// against the token subject otherwise.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated user extracted from the `Authorization: Bearer <token>` and
/// `X-User-Id` headers.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = match parts.headers.get(AUTHORIZATION) {
            Some(value) => {
                let header = value
                    .to_str()
                    .map_err(|_| ApiError::unauthorized("Invalid Authorization header format"))?;
                let token = header
                    .strip_prefix("Bearer ")
                    .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))?;
                Some(token.to_string())
            }
            None => None,
        };

        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if token.is_none() && user_id.is_none() {
            return Err(ApiError::unauthorized("Missing Authorization header"));
        }

        let credentials = Credentials { token, user_id };

        let identity = state
            .verifier
            .verify(&credentials)
            .await
            .map_err(|e| ApiError::unauthorized(e.to_string()))?;

        Ok(AuthUser {
            user_id: identity.user_id,
        })
    }
}
