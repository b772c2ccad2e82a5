//! Shared-token authentication middleware.
//!
//! Each API is protected by one static token configured in the environment:
//! - `VELA_API_AUTH_TOKEN` for the transactions and campaigns APIs
//! - `POLARIS_API_AUTH_TOKEN` for the accounts API
//!
//! Requests must carry `Authorization: Token <value>`. Anything else is
//! rejected with HTTP 401 `INVALID_TOKEN`.

use crate::{
    error::{AppError, ErrorCode},
    state::AppState,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

/// Name of the header identifying the calling channel.
pub const USER_CHANNEL_HEADER: &str = "bpl-user-channel";

/// Token carried by an `Authorization: Token <value>` header.
///
/// The scheme is matched case-insensitively.
pub fn extract_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("token") && !token.is_empty()).then_some(token)
}

/// Compare a supplied token with the configured one.
///
/// Both sides are hashed with SHA-256 first so the comparison time does not
/// depend on where the values differ. An empty configured token matches nothing.
pub fn token_matches(supplied: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let supplied = Sha256::digest(supplied.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    supplied
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn authorize(request: &Request, expected: &str) -> Result<(), AppError> {
    let supplied = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_token)
        .ok_or(AppError::Code(ErrorCode::InvalidToken))?;

    if token_matches(supplied, expected) {
        Ok(())
    } else {
        Err(AppError::Code(ErrorCode::InvalidToken))
    }
}

/// Guard for the transactions and campaigns routers.
///
/// # Errors
///
/// `INVALID_TOKEN` when the header is missing, malformed or wrong.
pub async fn require_vela_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&request, &state.config.vela_api_auth_token)?;
    Ok(next.run(request).await)
}

/// Guard for the accounts router.
pub async fn require_polaris_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&request, &state.config.polaris_api_auth_token)?;
    Ok(next.run(request).await)
}

/// Value of the `bpl-user-channel` header.
///
/// Rejects the request with `HEADER_VALIDATION_ERROR` when the header is
/// missing or empty.
#[derive(Debug, Clone)]
pub struct UserChannel(pub String);

impl<S> FromRequestParts<S> for UserChannel
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_CHANNEL_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|channel| !channel.is_empty())
            .map(|channel| UserChannel(channel.to_string()))
            .ok_or(AppError::Code(ErrorCode::HeaderValidationError))
    }
}
