//! Gatekeeper for protected routes.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::warn;
use uuid::Uuid;

use super::{store::TokenCheck, token::TOKEN_CHARS};
use crate::{error::AppError, state::AppState};

/// Identity of the caller, placed in request extensions by [`require_auth`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .copied()
            .ok_or_else(|| AppError::Credential("route is not behind require_auth".into()))
    }
}

/// Reads `Authorization: Bearer <token>` and checks the token's shape.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, &'static str> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or("missing authorization header")?
        .to_str()
        .map_err(|_| "authorization header is not ascii")?;

    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or("invalid authorization scheme")?
        .trim();

    if token.len() != TOKEN_CHARS || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err("malformed bearer token");
    }
    Ok(token)
}

/// Rejects the request unless it carries a valid bearer token; on success the
/// handler can extract [`AuthUser`].
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = match bearer_token(request.headers()) {
        Ok(t) => t.to_owned(),
        Err(reason) => {
            warn!(reason, path = %request.uri().path(), "request rejected");
            return Err(AppError::Credential(reason.into()));
        }
    };

    let user_id = match state.tokens.check(&token).await? {
        TokenCheck::Valid(id) => id,
        rejected => {
            warn!(reason = rejected.reason(), path = %request.uri().path(), "request rejected");
            return Err(AppError::Credential(rejected.reason().into()));
        }
    };

    request.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(request).await)
}
