//! Bearer-token authentication against the static `API_KEY_<PROJECT>`
//! table (§4.5). Adapted from the teacher's JWT `require_auth` middleware:
//! same extractor/rejection shape, a static lookup table in place of a
//! signature check.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::state::AppState;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,
    #[error("invalid authorization header format")]
    InvalidAuthHeader,
    #[error("invalid API key")]
    InvalidApiKey,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let code = match self {
            Self::MissingAuthHeader => "MISSING_AUTH",
            Self::InvalidAuthHeader => "INVALID_AUTH_HEADER",
            Self::InvalidApiKey => "INVALID_API_KEY",
        };
        let body = Json(ErrorResponse {
            error: code.to_string(),
            message: self.to_string(),
        });
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

/// The project an authenticated request is allowed to write as. Stored
/// records always carry this value, never a `project` field from the body
/// (§4.5 invariant).
#[derive(Debug, Clone)]
pub struct AuthenticatedProject(pub String);

impl<S> FromRequestParts<S> for AuthenticatedProject
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}

/// Validate the bearer token against the configured API key table and
/// inject the resolved project into request extensions.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingAuthHeader)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidAuthHeader)?;

    let project = state
        .config
        .api_keys
        .get(token)
        .cloned()
        .ok_or(AuthError::InvalidApiKey)?;

    request
        .extensions_mut()
        .insert(AuthenticatedProject(project));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_map_to_401() {
        let resp = AuthError::InvalidApiKey.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
